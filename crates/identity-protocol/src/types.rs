//! Core session and token types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a user (UUID string from the provider).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a new random user ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a user ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the user ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How the current session was established.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Passkey,
    MagicLink,
    EmailCode,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Passkey => write!(f, "passkey"),
            AuthMethod::MagicLink => write!(f, "magic_link"),
            AuthMethod::EmailCode => write!(f, "email_code"),
        }
    }
}

/// The persisted session for one authenticated user.
///
/// Invariant: successive persisted `expires_at` values for the same
/// `user_id` are non-decreasing. The stale-write guard in the session
/// store enforces this before every token-bearing write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A partial update to a [`SessionRecord`].
///
/// `user_id` is always required; every other field overwrites the
/// stored value only when present. Fields cannot be cleared through a
/// patch, only replaced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SessionPatch {
    /// Creates an empty patch for a user.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// Builds the full-session patch written at token issuance.
    pub fn from_issuance(
        user: &AuthUser,
        tokens: &AuthTokens,
        method: AuthMethod,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user.id.clone(),
            email: Some(user.email.clone()),
            name: user.name.clone(),
            email_verified: Some(user.email_verified),
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Some(tokens.expires_at),
            refreshed_at: Some(now),
            auth_method: Some(method),
            supabase_token: tokens.supabase_token.clone(),
            supabase_expires_at: tokens.supabase_expires_at,
            metadata: None,
        }
    }

    /// Builds the token-only patch written after a refresh.
    pub fn from_refresh(user_id: UserId, tokens: &AuthTokens, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: Some(tokens.expires_at),
            refreshed_at: Some(now),
            supabase_token: tokens.supabase_token.clone(),
            supabase_expires_at: tokens.supabase_expires_at,
            ..Default::default()
        }
    }

    /// Merges this patch over an existing record. Unspecified fields
    /// keep their stored values.
    pub fn merge_into(&self, existing: &SessionRecord) -> SessionRecord {
        SessionRecord {
            user_id: self.user_id.clone(),
            email: self.email.clone().unwrap_or_else(|| existing.email.clone()),
            name: self.name.clone().or_else(|| existing.name.clone()),
            email_verified: self.email_verified.or(existing.email_verified),
            access_token: self
                .access_token
                .clone()
                .unwrap_or_else(|| existing.access_token.clone()),
            refresh_token: self
                .refresh_token
                .clone()
                .or_else(|| existing.refresh_token.clone()),
            expires_at: self.expires_at.unwrap_or(existing.expires_at),
            refreshed_at: self.refreshed_at.unwrap_or(existing.refreshed_at),
            auth_method: self.auth_method.unwrap_or(existing.auth_method),
            supabase_token: self
                .supabase_token
                .clone()
                .or_else(|| existing.supabase_token.clone()),
            supabase_expires_at: self.supabase_expires_at.or(existing.supabase_expires_at),
            metadata: self.metadata.clone().or_else(|| existing.metadata.clone()),
        }
    }

    /// Returns the first mandatory field missing for record creation,
    /// or `None` when the patch can stand alone as a new record.
    pub fn missing_for_create(&self) -> Option<&'static str> {
        if self.email.is_none() {
            Some("email")
        } else if self.access_token.is_none() {
            Some("access_token")
        } else if self.expires_at.is_none() {
            Some("expires_at")
        } else if self.auth_method.is_none() {
            Some("auth_method")
        } else {
            None
        }
    }
}

/// Tokens returned by the provider after verification or refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_expires_at: Option<DateTime<Utc>>,
}

/// Normalized user profile returned by the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub email_verified: bool,
}

/// A server-issued passkey authentication challenge.
///
/// The challenge payload stays base64url-encoded; the ceremony driver
/// hands it to the platform untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PasskeyChallenge {
    pub challenge: String,
    pub rp_id: String,
    /// Ceremony timeout, server-supplied (typically 60s).
    pub timeout_ms: u64,
    #[serde(default)]
    pub allow_credentials: Vec<String>,
}

/// Server-issued passkey enrollment options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistrationOptions {
    pub challenge: String,
    pub rp_id: String,
    pub user_id: UserId,
    pub user_name: String,
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            user_id: UserId::from_string("user-1"),
            email: "a@x.com".to_string(),
            name: Some("Ada".to_string()),
            email_verified: Some(true),
            access_token: "at-1".to_string(),
            refresh_token: Some("rt-1".to_string()),
            expires_at,
            refreshed_at: expires_at - Duration::hours(1),
            auth_method: AuthMethod::Passkey,
            supabase_token: None,
            supabase_expires_at: None,
            metadata: None,
        }
    }

    #[test]
    fn patch_merge_keeps_unspecified_fields() {
        let now = Utc::now();
        let existing = record(now + Duration::hours(1));

        let mut patch = SessionPatch::new("user-1");
        patch.access_token = Some("at-2".to_string());
        patch.expires_at = Some(now + Duration::hours(2));

        let merged = patch.merge_into(&existing);
        assert_eq!(merged.access_token, "at-2");
        assert_eq!(merged.expires_at, now + Duration::hours(2));
        // Untouched fields survive.
        assert_eq!(merged.email, "a@x.com");
        assert_eq!(merged.name.as_deref(), Some("Ada"));
        assert_eq!(merged.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(merged.auth_method, AuthMethod::Passkey);
    }

    #[test]
    fn patch_merge_overwrites_specified_fields() {
        let now = Utc::now();
        let existing = record(now);

        let mut patch = SessionPatch::new("user-1");
        patch.name = Some("Grace".to_string());
        patch.email_verified = Some(false);

        let merged = patch.merge_into(&existing);
        assert_eq!(merged.name.as_deref(), Some("Grace"));
        assert_eq!(merged.email_verified, Some(false));
    }

    #[test]
    fn missing_for_create_reports_first_gap() {
        let mut patch = SessionPatch::new("user-1");
        assert_eq!(patch.missing_for_create(), Some("email"));

        patch.email = Some("a@x.com".to_string());
        assert_eq!(patch.missing_for_create(), Some("access_token"));

        patch.access_token = Some("at".to_string());
        assert_eq!(patch.missing_for_create(), Some("expires_at"));

        patch.expires_at = Some(Utc::now());
        assert_eq!(patch.missing_for_create(), Some("auth_method"));

        patch.auth_method = Some(AuthMethod::EmailCode);
        assert_eq!(patch.missing_for_create(), None);
    }

    #[test]
    fn issuance_patch_is_complete() {
        let now = Utc::now();
        let user = AuthUser {
            id: UserId::from_string("user-9"),
            email: "b@x.com".to_string(),
            name: None,
            email_verified: true,
        };
        let tokens = AuthTokens {
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            expires_at: now + Duration::hours(1),
            supabase_token: None,
            supabase_expires_at: None,
        };

        let patch = SessionPatch::from_issuance(&user, &tokens, AuthMethod::MagicLink, now);
        assert_eq!(patch.missing_for_create(), None);
        assert_eq!(patch.refreshed_at, Some(now));
        assert_eq!(patch.auth_method, Some(AuthMethod::MagicLink));
    }

    #[test]
    fn session_record_round_trips_through_json() {
        let rec = record(Utc::now() + Duration::hours(1));
        let json = serde_json::to_string(&rec).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn auth_method_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AuthMethod::MagicLink).unwrap(),
            "\"magic_link\""
        );
        assert_eq!(AuthMethod::Passkey.to_string(), "passkey");
    }
}
