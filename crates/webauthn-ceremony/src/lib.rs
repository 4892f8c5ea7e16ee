//! Passkey (WebAuthn) ceremony orchestration.
//!
//! Wraps challenge retrieval from the identity provider and the
//! platform credential ceremony behind one orchestrator. The platform
//! API itself stays opaque: credential material crosses the
//! [`CredentialDriver`] seam as raw JSON, exactly as the provider
//! expects it back for verification.
//!
//! Conditional mediation (the autofill-style ceremony fired
//! speculatively while the user types an email) is handled here: its
//! failures are swallowed and reported as "no result", never surfaced,
//! because a speculative ceremony must never interrupt input.

mod driver;
mod orchestrator;

pub use driver::{CeremonyOutcome, CredentialDriver};
pub use orchestrator::WebAuthnOrchestrator;

use thiserror::Error;

/// Errors from a credential ceremony.
///
/// Silent in conditional mode, surfaced in explicit mode.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CeremonyError {
    /// No credential is available for this challenge on this device.
    #[error("no credential available")]
    NoCredential,

    /// The user dismissed the ceremony prompt.
    #[error("ceremony dismissed")]
    Dismissed,

    /// The platform does not support the requested ceremony.
    #[error("ceremony not supported on this platform")]
    Unsupported,

    /// The ceremony did not complete within the challenge timeout.
    #[error("ceremony timed out")]
    Timeout,

    /// Any other platform failure.
    #[error("platform credential error: {0}")]
    Platform(String),
}

/// Result type for ceremony operations.
pub type CeremonyResult<T> = Result<T, CeremonyError>;
