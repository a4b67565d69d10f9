//! Route guard decisions over the session state.

use super::state::SessionState;

/// What a surface should do given the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still loading, render a placeholder.
    Wait,
    Proceed,
    RedirectToLogin,
    RedirectToDashboard,
}

/// Gate for screens that require a signed-in admin.
pub fn protected(state: &SessionState) -> GuardDecision {
    if state.is_loading {
        GuardDecision::Wait
    } else if state.is_authenticated {
        GuardDecision::Proceed
    } else {
        GuardDecision::RedirectToLogin
    }
}

/// Gate for the login screen: signed-in admins are sent onwards.
pub fn guest_only(state: &SessionState) -> GuardDecision {
    if state.is_loading {
        GuardDecision::Wait
    } else if state.is_authenticated {
        GuardDecision::RedirectToDashboard
    } else {
        GuardDecision::Proceed
    }
}
