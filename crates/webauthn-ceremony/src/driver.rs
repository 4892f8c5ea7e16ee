//! The platform credential seam.

use crate::CeremonyResult;
use async_trait::async_trait;
use identity_protocol::{PasskeyChallenge, RegistrationOptions};

/// Result of a completed ceremony: the credential that answered plus
/// the platform's raw response, forwarded verbatim to the provider for
/// verification.
#[derive(Clone, Debug, PartialEq)]
pub struct CeremonyOutcome {
    pub credential_id: String,
    pub response: serde_json::Value,
}

/// Bridge to the platform credential API.
///
/// Implementations talk to whatever the host exposes (a browser's
/// `navigator.credentials`, an OS authenticator service). The
/// orchestrator never inspects the response payload; it stays opaque
/// JSON end to end.
#[async_trait]
pub trait CredentialDriver: Send + Sync {
    /// Runs an authentication ceremony for the given challenge.
    ///
    /// `conditional` requests conditional mediation: the platform
    /// surfaces credentials passively (autofill style) instead of
    /// prompting. Drivers on platforms without conditional support
    /// return [`CeremonyError::Unsupported`](crate::CeremonyError).
    async fn get(
        &self,
        challenge: &PasskeyChallenge,
        conditional: bool,
    ) -> CeremonyResult<CeremonyOutcome>;

    /// Runs a registration ceremony, creating a new credential.
    async fn create(&self, options: &RegistrationOptions) -> CeremonyResult<CeremonyOutcome>;
}
