// Navigation locations and the navigator capability the route guard drives

use std::sync::Mutex;
use tokio::sync::watch;

/// Groups and pages that belong to the sign-in flow
const AUTH_FLOW_SEGMENTS: &[&str] = &["(auth)", "login", "register", "forgot-password"];

/// Where the UI currently is, as ordered path segments
///
/// An empty location is what the runtime reports before the router has
/// mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NavigationLocation {
    segments: Vec<String>,
}

impl NavigationLocation {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a slash-separated path such as `/course/12`
    pub fn from_path(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }

    /// Login page
    pub fn login() -> Self {
        Self::from_path("/login")
    }

    /// Default location once signed in
    pub fn home() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether this is a login/register/forgot-password page
    pub fn is_auth_flow(&self) -> bool {
        self.segments
            .first()
            .is_some_and(|first| AUTH_FLOW_SEGMENTS.contains(&first.as_str()))
    }
}

impl std::fmt::Display for NavigationLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// The navigation runtime's `replace` primitive
pub trait Navigator: Send + Sync {
    fn replace(&self, location: &NavigationLocation);
}

/// Minimal navigation runtime: a current location plus a replace log
///
/// Used by the CLI and tests in place of a real UI router.
pub struct InMemoryRouter {
    current: watch::Sender<NavigationLocation>,
    replaced: Mutex<Vec<NavigationLocation>>,
}

impl InMemoryRouter {
    pub fn new(initial: NavigationLocation) -> Self {
        let (current, _) = watch::channel(initial);
        Self {
            current,
            replaced: Mutex::new(Vec::new()),
        }
    }

    /// User-driven navigation
    pub fn push(&self, location: NavigationLocation) {
        tracing::debug!(to = %location, "Navigating");
        self.current.send_replace(location);
    }

    pub fn current(&self) -> NavigationLocation {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NavigationLocation> {
        self.current.subscribe()
    }

    /// Every location passed to `replace`, oldest first
    pub fn replaced(&self) -> Vec<NavigationLocation> {
        self.replaced
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Navigator for InMemoryRouter {
    fn replace(&self, location: &NavigationLocation) {
        tracing::info!(to = %location, "Replacing location");
        if let Ok(mut log) = self.replaced.lock() {
            log.push(location.clone());
        }
        self.current.send_replace(location.clone());
    }
}
