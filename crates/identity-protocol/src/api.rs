//! The identity provider boundary.

use crate::error::ApiResult;
use crate::types::{AuthTokens, AuthUser, PasskeyChallenge, RegistrationOptions, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of an email discovery lookup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserCheck {
    pub exists: bool,
    /// Present when the account exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub has_passkeys: bool,
    pub email_verified: bool,
}

/// A completed verification: the provider vouches for the user and
/// hands out session tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifiedSession {
    pub user: AuthUser,
    pub tokens: AuthTokens,
}

/// Registration request for both self-service and invitation flows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Present only for invitation-based registration; possession of
    /// the token pre-verifies the email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_token: Option<String>,
}

/// Registration result. Invitation-based registrations come back with
/// tokens (the email is already proven); public self-service
/// registrations return no tokens until the email is verified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub user: AuthUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<AuthTokens>,
}

/// Client for the external identity provider API.
///
/// The HTTP transport behind this trait is out of scope here; every
/// method returns normalized results or a classified [`ApiError`].
///
/// [`ApiError`]: crate::ApiError
#[async_trait]
pub trait IdentityApi: Send + Sync {
    /// Looks up whether an account exists for this email and what
    /// sign-in methods it supports.
    async fn check_user(&self, email: &str) -> ApiResult<UserCheck>;

    /// Fetches a passkey authentication challenge for this email.
    async fn get_passkey_challenge(&self, email: &str) -> ApiResult<PasskeyChallenge>;

    /// Verifies a completed passkey ceremony response.
    async fn verify_passkey(
        &self,
        user_id: &UserId,
        response: serde_json::Value,
    ) -> ApiResult<VerifiedSession>;

    /// Sends a magic sign-in link to the address.
    async fn send_magic_link(&self, email: &str) -> ApiResult<()>;

    /// Sends a one-time sign-in code to the address.
    async fn send_email_code(&self, email: &str) -> ApiResult<()>;

    /// Exchanges an emailed code for a session.
    async fn verify_email_code(&self, email: &str, code: &str) -> ApiResult<VerifiedSession>;

    /// Rotates the refresh token for fresh session tokens.
    async fn refresh_token(&self, refresh_token: &str) -> ApiResult<AuthTokens>;

    /// Creates a new account.
    async fn register(&self, request: RegisterRequest) -> ApiResult<RegisterOutcome>;

    /// Fetches passkey enrollment options for a registered user.
    async fn get_registration_options(&self, user_id: &UserId)
        -> ApiResult<RegistrationOptions>;

    /// Stores a completed passkey enrollment.
    async fn register_passkey(
        &self,
        user_id: &UserId,
        response: serde_json::Value,
    ) -> ApiResult<()>;
}
