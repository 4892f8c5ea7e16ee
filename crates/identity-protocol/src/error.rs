//! Classified errors for the identity provider boundary.

use thiserror::Error;

/// Errors returned by [`crate::IdentityApi`] implementations.
///
/// The classification drives recovery in the auth flow: transient
/// errors retry the same state under a bounded counter, permanent
/// errors route back to email entry.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApiError {
    /// Malformed input, caught locally. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transport-level failure. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time. Retryable.
    #[error("request timed out")]
    Timeout,

    /// The provider rejected the request with an HTTP status.
    #[error("provider rejected request ({status}): {message}")]
    ProviderRejected { status: u16, message: String },
}

impl ApiError {
    /// Whether a retry of the same operation may succeed.
    ///
    /// Network failures, timeouts, rate limits (429) and provider 5xx
    /// responses are transient. Everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout => true,
            ApiError::ProviderRejected { status, .. } => *status == 429 || *status >= 500,
            ApiError::Validation(_) => false,
        }
    }

    /// Whether the failure is permanent (expired/invalid token,
    /// malformed invitation, any other 4xx).
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Shorthand for a permanent provider rejection.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ApiError::ProviderRejected {
            status,
            message: message.into(),
        }
    }
}

/// Result type for identity provider operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_and_timeout_are_transient() {
        assert!(ApiError::Network("reset".to_string()).is_transient());
        assert!(ApiError::Timeout.is_transient());
    }

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(ApiError::rejected(429, "slow down").is_transient());
        assert!(ApiError::rejected(500, "oops").is_transient());
        assert!(ApiError::rejected(503, "maintenance").is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(ApiError::rejected(400, "bad invitation").is_permanent());
        assert!(ApiError::rejected(401, "expired token").is_permanent());
        assert!(ApiError::rejected(404, "no such user").is_permanent());
    }

    #[test]
    fn validation_is_permanent() {
        assert!(ApiError::Validation("not an email".to_string()).is_permanent());
    }
}
