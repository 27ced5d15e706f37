use std::sync::Arc;
use tokio::sync::{watch, Mutex, OnceCell};

use super::authority::AuthorityClient;
use super::store::{self, TokenStore};
use super::types::{token_preview, AuthorityResult, Credentials, SessionSnapshot, SessionStatus};
use crate::error::Result;

/// Session manager
/// Single owner of the session status and the in-memory access token
///
/// Mutating operations (`initialize`, `login`, `logout`) run one at a time
/// behind an operation lock, so a login issued while the startup check is in
/// flight waits for it to settle.
pub struct SessionManager {
    /// Persisted token pair
    store: Arc<dyn TokenStore>,

    /// Login and introspection
    authority: Arc<dyn AuthorityClient>,

    /// Current snapshot; receivers get copies, never mutate
    state: watch::Sender<SessionSnapshot>,

    /// Serializes status-mutating operations
    op_lock: Mutex<()>,

    /// Settled result of the one startup check
    init: OnceCell<Result<SessionStatus>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn TokenStore>, authority: Arc<dyn AuthorityClient>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::new(SessionStatus::Uninitialized, None));

        Self {
            store,
            authority,
            state,
            op_lock: Mutex::new(()),
            init: OnceCell::new(),
        }
    }

    /// Load the persisted session and confirm it with the authority
    ///
    /// Runs once per manager. Concurrent and later callers await the same
    /// settled result. If a login or logout settled the session first, the
    /// store is left alone and that status is returned. Any introspection failure is treated as an invalid
    /// token: the store is cleared and the status becomes `Unauthenticated`.
    pub async fn initialize(&self) -> Result<SessionStatus> {
        self.init
            .get_or_init(|| self.run_initialize())
            .await
            .clone()
    }

    async fn run_initialize(&self) -> Result<SessionStatus> {
        let _op = self.op_lock.lock().await;

        // A login or logout that ran first already settled the session
        let current = self.status();
        if current != SessionStatus::Uninitialized {
            tracing::debug!(status = %current, "Session already settled, skipping startup check");
            return Ok(current);
        }

        tracing::info!("Checking persisted session...");
        self.publish(SessionStatus::Checking, None);

        let pair = match store::load_pair(self.store.as_ref()).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("Failed to read persisted session: {}", e);
                self.publish(SessionStatus::Unauthenticated, None);
                return Err(e);
            }
        };

        let Some(pair) = pair else {
            tracing::info!("No persisted session");
            self.publish(SessionStatus::Unauthenticated, None);
            return Ok(SessionStatus::Unauthenticated);
        };

        match self.authority.introspect(&pair.access_token).await {
            Ok(AuthorityResult { valid: true }) => {
                tracing::info!(
                    "✅ Persisted session is valid (token: {})",
                    token_preview(&pair.access_token)
                );
                self.publish(SessionStatus::Authenticated, Some(pair.access_token));
                Ok(SessionStatus::Authenticated)
            }
            Ok(AuthorityResult { valid: false }) => {
                tracing::warn!("Persisted token rejected by authority");
                self.discard_session().await
            }
            Err(e) if e.is_transport() => {
                tracing::warn!("Authority unreachable, treating token as invalid: {}", e);
                self.discard_session().await
            }
            Err(e) => {
                tracing::warn!("Introspection failed, treating token as invalid: {}", e);
                self.discard_session().await
            }
        }
    }

    /// Drop an invalid persisted session
    async fn discard_session(&self) -> Result<SessionStatus> {
        let cleared = store::clear_pair(self.store.as_ref()).await;
        self.publish(SessionStatus::Unauthenticated, None);

        match cleared {
            Ok(()) => Ok(SessionStatus::Unauthenticated),
            Err(e) => {
                tracing::error!("Failed to clear invalid session: {}", e);
                Err(e)
            }
        }
    }

    /// Sign in and persist the issued token pair
    ///
    /// On failure the status is left as it was and the error is returned.
    /// Nothing is retried.
    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        credentials.validate()?;

        let _op = self.op_lock.lock().await;
        tracing::info!(username = %credentials.username, "Logging in...");

        let pair = match self.authority.login(credentials).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(username = %credentials.username, "Login failed: {}", e);
                return Err(e);
            }
        };

        store::save_pair(self.store.as_ref(), &pair).await?;

        tracing::info!(
            "✅ Logged in (token: {})",
            token_preview(&pair.access_token)
        );
        self.publish(SessionStatus::Authenticated, Some(pair.access_token));
        Ok(())
    }

    /// Forget the session
    ///
    /// The in-memory session is dropped even when clearing the store fails;
    /// the storage error is still returned.
    pub async fn logout(&self) -> Result<()> {
        let _op = self.op_lock.lock().await;
        tracing::info!("Logging out");

        let cleared = store::clear_pair(self.store.as_ref()).await;
        self.publish(SessionStatus::Unauthenticated, None);

        if let Err(ref e) = cleared {
            tracing::error!("Failed to clear persisted session: {}", e);
        }
        cleared
    }

    /// Current access token, if any; never performs I/O
    pub fn current_token(&self) -> Option<String> {
        self.state.borrow().access_token.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to session changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    /// Persisted refresh token
    ///
    /// Read-only: nothing in the engine rotates tokens.
    pub async fn refresh_token(&self) -> Result<Option<String>> {
        Ok(store::load_pair(self.store.as_ref())
            .await?
            .map(|pair| pair.refresh_token))
    }

    /// Replace the snapshot, notifying subscribers only on an actual change
    fn publish(&self, status: SessionStatus, access_token: Option<String>) {
        self.state.send_if_modified(|current| {
            if current.status == status && current.access_token == access_token {
                return false;
            }
            tracing::debug!(from = %current.status, to = %status, "Session status changed");
            *current = SessionSnapshot::new(status, access_token);
            true
        });
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .finish()
    }
}
