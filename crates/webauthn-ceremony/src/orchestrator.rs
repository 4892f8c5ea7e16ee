//! Ceremony orchestration over the provider API and credential driver.

use crate::driver::{CeremonyOutcome, CredentialDriver};
use crate::{CeremonyError, CeremonyResult};
use identity_protocol::{ApiResult, IdentityApi, PasskeyChallenge, RegistrationOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runs passkey ceremonies end to end: fetch a challenge from the
/// provider, hand it to the platform driver, return the raw response
/// for verification.
pub struct WebAuthnOrchestrator {
    api: Arc<dyn IdentityApi>,
    driver: Arc<dyn CredentialDriver>,
}

impl WebAuthnOrchestrator {
    pub fn new(api: Arc<dyn IdentityApi>, driver: Arc<dyn CredentialDriver>) -> Self {
        Self { api, driver }
    }

    /// Fetches an authentication challenge for this email.
    pub async fn get_authentication_challenge(&self, email: &str) -> ApiResult<PasskeyChallenge> {
        self.api.get_passkey_challenge(email).await
    }

    /// Runs an authentication ceremony.
    ///
    /// Explicit mode (`conditional == false`) surfaces every failure.
    /// Conditional mode runs speculatively while the user is still
    /// typing, so any failure collapses to `Ok(None)`; nothing from a
    /// speculative ceremony may interrupt input.
    ///
    /// The server-supplied challenge timeout is enforced here as a
    /// ceiling on the driver call, independent of whatever the platform
    /// does internally.
    pub async fn authenticate(
        &self,
        challenge: &PasskeyChallenge,
        conditional: bool,
    ) -> CeremonyResult<Option<CeremonyOutcome>> {
        let ceremony = self.driver.get(challenge, conditional);
        let result = match tokio::time::timeout(
            Duration::from_millis(challenge.timeout_ms),
            ceremony,
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CeremonyError::Timeout),
        };

        match result {
            Ok(outcome) => {
                debug!(
                    credential_id = %outcome.credential_id,
                    conditional,
                    "passkey ceremony completed"
                );
                Ok(Some(outcome))
            }
            Err(error) if conditional => {
                debug!(%error, "conditional passkey ceremony yielded nothing");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Runs a registration ceremony for server-issued enrollment
    /// options.
    pub async fn register(&self, options: &RegistrationOptions) -> CeremonyResult<CeremonyOutcome> {
        let ceremony = self.driver.create(options);
        match tokio::time::timeout(Duration::from_millis(options.timeout_ms), ceremony).await {
            Ok(result) => result,
            Err(_) => Err(CeremonyError::Timeout),
        }
    }
}
