// Route guard
// Keeps the navigation location consistent with the session status

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::{SessionSnapshot, SessionStatus};
use crate::navigation::{NavigationLocation, Navigator};

/// Default delay before acting on a new (status, location) pair
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// What the guard wants for a given (status, location) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled yet: show the blocking indicator, decide nothing
    Loading,
    /// Location is consistent with the session
    Stay,
    Redirect(NavigationLocation),
}

/// Decision table
pub fn decide(status: SessionStatus, location: &NavigationLocation) -> GuardDecision {
    match status {
        SessionStatus::Uninitialized | SessionStatus::Checking => GuardDecision::Loading,
        SessionStatus::Unauthenticated if !location.is_auth_flow() => {
            GuardDecision::Redirect(NavigationLocation::login())
        }
        SessionStatus::Authenticated if location.is_auth_flow() => {
            GuardDecision::Redirect(NavigationLocation::home())
        }
        _ => GuardDecision::Stay,
    }
}

/// Observes session and location, redirecting after inputs settle
///
/// Every change to either input restarts the debounce timer, so a decision
/// is only taken on a pair that stayed put for the whole delay. A pair that
/// was already redirected is not redirected again until the guard has seen
/// a consistent state in between.
pub struct RouteGuard {
    session: watch::Receiver<SessionSnapshot>,
    location: watch::Receiver<NavigationLocation>,
    navigator: Arc<dyn Navigator>,
    debounce: Duration,
    loading: watch::Sender<bool>,
    last_redirect: Option<(SessionStatus, NavigationLocation)>,
}

impl RouteGuard {
    /// Start the guard on the current runtime
    pub fn spawn(
        session: watch::Receiver<SessionSnapshot>,
        location: watch::Receiver<NavigationLocation>,
        navigator: Arc<dyn Navigator>,
        debounce: Duration,
    ) -> GuardHandle {
        let initially_loading = !session.borrow().status.is_settled();
        let (loading, loading_rx) = watch::channel(initially_loading);

        let guard = RouteGuard {
            session,
            location,
            navigator,
            debounce,
            loading,
            last_redirect: None,
        };

        GuardHandle {
            task: tokio::spawn(guard.run()),
            loading: loading_rx,
        }
    }

    async fn run(mut self) {
        tracing::debug!(debounce_ms = self.debounce.as_millis() as u64, "Route guard started");

        loop {
            let status = self.session.borrow_and_update().status;
            let location = self.location.borrow_and_update().clone();
            self.loading.send_replace(!status.is_settled());

            let deadline = tokio::time::sleep(self.debounce);
            tokio::pin!(deadline);

            // A newer input drops the pending decision and starts over
            let settled = tokio::select! {
                changed = self.session.changed() => {
                    if changed.is_err() { break; }
                    false
                }
                changed = self.location.changed() => {
                    if changed.is_err() { break; }
                    false
                }
                _ = &mut deadline => true,
            };

            if !settled {
                continue;
            }

            self.act(status, location);

            let open = tokio::select! {
                changed = self.session.changed() => changed.is_ok(),
                changed = self.location.changed() => changed.is_ok(),
            };
            if !open {
                break;
            }
        }

        tracing::debug!("Route guard stopped: inputs closed");
    }

    fn act(&mut self, status: SessionStatus, location: NavigationLocation) {
        match decide(status, &location) {
            GuardDecision::Loading => {
                tracing::debug!(status = %status, "Session not settled, waiting");
            }
            GuardDecision::Stay => {
                self.last_redirect = None;
            }
            GuardDecision::Redirect(target) => {
                let key = (status, location);
                if self.last_redirect.as_ref() == Some(&key) {
                    tracing::debug!(from = %key.1, "Already redirected for this state, skipping");
                    return;
                }

                tracing::info!(status = %status, from = %key.1, to = %target, "Redirecting");
                self.navigator.replace(&target);
                self.last_redirect = Some(key);
            }
        }
    }
}

/// Owner of a running guard; the guard stops when this is dropped
pub struct GuardHandle {
    task: JoinHandle<()>,
    loading: watch::Receiver<bool>,
}

impl GuardHandle {
    /// Whether the UI should show the blocking loading indicator
    pub fn loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Stop the guard; a pending redirect is dropped
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
