//! Host environment hooks for session termination.
//!
//! When the refresh endpoint itself answers 401 the session is gone. The
//! host clears whatever session artifacts it keeps locally and navigates to
//! the login location, carrying the current location for return-after-login.

use parking_lot::Mutex;
use url::form_urlencoded;

/// What the embedding application exposes to the coordinator.
pub trait SessionHost: Send + Sync + 'static {
    /// Current location (path and query) to return to after login.
    fn location(&self) -> String;

    /// Drop locally held session state.
    fn clear_session(&self);

    /// Move the user to `target`.
    fn navigate(&self, target: &str);
}

/// `<login_path>?session_expired=true&redirect=<location>`.
pub fn login_redirect(login_path: &str, location: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("session_expired", "true")
        .append_pair("redirect", location)
        .finish();
    format!("{}?{}", login_path, query)
}

/// Host with no UI: remembers a location and logs the rest.
#[derive(Debug)]
pub struct HeadlessHost {
    location: Mutex<String>,
}

impl HeadlessHost {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: Mutex::new(location.into()),
        }
    }
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SessionHost for HeadlessHost {
    fn location(&self) -> String {
        self.location.lock().clone()
    }

    fn clear_session(&self) {
        tracing::info!("Session cleared");
    }

    fn navigate(&self, target: &str) {
        tracing::warn!(redirect = target, "Session expired, login required");
        *self.location.lock() = target.to_string();
    }
}
