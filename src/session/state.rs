//! In-memory mirror of the session and its read-only handle.

use tokio::sync::watch;

use super::profile::AdminProfile;

/// Where the session lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Initialize has not run yet.
    Uninitialized,
    /// Rehydration or a login request is in flight.
    Loading,
    Authenticated,
    Anonymous,
}

/// Snapshot of the session as consumers see it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub token: Option<String>,
    pub profile: Option<AdminProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub(crate) initialized: bool,
}

impl Default for SessionState {
    /// Consumers start out blocked on loading until initialize settles.
    fn default() -> Self {
        Self {
            token: None,
            profile: None,
            is_authenticated: false,
            is_loading: true,
            initialized: false,
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        if !self.initialized {
            SessionPhase::Uninitialized
        } else if self.is_loading {
            SessionPhase::Loading
        } else if self.is_authenticated {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }

    pub(crate) fn authenticated(token: String, profile: AdminProfile) -> Self {
        Self {
            token: Some(token),
            profile: Some(profile),
            is_authenticated: true,
            is_loading: false,
            initialized: true,
        }
    }

    pub(crate) fn anonymous() -> Self {
        Self {
            token: None,
            profile: None,
            is_authenticated: false,
            is_loading: false,
            initialized: true,
        }
    }
}

/// Read-only view of the session, cheap to clone and hand out.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    /// Current snapshot.
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_loading
    }

    pub fn profile(&self) -> Option<AdminProfile> {
        self.rx.borrow().profile.clone()
    }

    /// A receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }

    /// Wait until the session is no longer loading and return that state.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.rx.clone();
        if rx
            .wait_for(|s| s.initialized && !s.is_loading)
            .await
            .is_err()
        {
            tracing::debug!("Session controller dropped before settling");
        }
        let state = rx.borrow().clone();
        state
    }
}
