//! Per-flow ephemeral context and the observable snapshot.

use crate::state::{AuthState, Scenario, Surface};
use identity_protocol::{ApiError, AuthMethod, UserId};
use std::time::Duration as StdDuration;

/// Ephemeral per-flow state. Created when an email is submitted,
/// discarded on sign-out or when a permanent failure routes the flow
/// home.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthContext {
    pub email: String,
    pub user_id: Option<UserId>,
    pub user_exists: bool,
    pub email_verified: bool,
    pub scenario: Option<Scenario>,
    pub invitation_token: Option<String>,
    pub has_passkeys: bool,
    /// Set when the platform reports no usable credential; the passkey
    /// option stays off for the remainder of the session.
    pub passkey_disabled: bool,
    pub selected_method: Option<AuthMethod>,
    pub available_methods: Vec<AuthMethod>,
    pub retry_count: u32,
    pub last_error: Option<ApiError>,
}

impl AuthContext {
    /// A fresh context preserving only the diagnostic error.
    pub(crate) fn reset_keeping_error(&self) -> Self {
        Self {
            last_error: self.last_error.clone(),
            ..Default::default()
        }
    }

    /// Sign-in methods to offer a returning user, passkey first.
    pub(crate) fn methods_on_offer(&self) -> Vec<AuthMethod> {
        let mut methods = Vec::new();
        if self.has_passkeys && !self.passkey_disabled {
            methods.push(AuthMethod::Passkey);
        }
        methods.push(AuthMethod::MagicLink);
        methods.push(AuthMethod::EmailCode);
        methods
    }
}

/// One observable state change: the current state plus its context.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowSnapshot {
    pub state: AuthState,
    pub context: AuthContext,
}

impl Default for FlowSnapshot {
    fn default() -> Self {
        Self {
            state: AuthState::EmailEntry,
            context: AuthContext::default(),
        }
    }
}

/// Tuning knobs for the flow.
#[derive(Clone, Debug)]
pub struct FlowConfig {
    pub surface: Surface,
    /// Lead time before token expiry at which refresh is scheduled.
    pub refresh_before: chrono::Duration,
    /// Bound on attempts per operation under transient failures.
    pub max_attempts: u32,
    /// Delay before retrying a failed refresh while the current access
    /// token remains valid.
    pub refresh_retry_after: StdDuration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            surface: Surface::Public,
            refresh_before: chrono::Duration::minutes(5),
            max_attempts: 3,
            refresh_retry_after: StdDuration::from_secs(60),
        }
    }
}
