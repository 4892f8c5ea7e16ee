//! Coordination protocol types.

use chrono::{DateTime, Utc};
use identity_protocol::AuthTokens;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a browser tab (UUID string).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub String);

impl TabId {
    /// Creates a new random tab ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a tab ID from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the tab ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A refresh announcement in flight: which tab claimed the refresh and
/// when. Cleared on completion, failure, or waiter timeout.
#[derive(Clone, Debug, PartialEq)]
pub struct RefreshClaim {
    pub tab_id: TabId,
    pub started_at: DateTime<Utc>,
}

/// Messages exchanged on the refresh broadcast channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RefreshSignal {
    /// A tab is about to call the provider's refresh endpoint.
    #[serde(rename = "REFRESH_STARTING")]
    Starting {
        tab_id: TabId,
        started_at: DateTime<Utc>,
    },
    /// The originating tab refreshed successfully; waiters adopt these
    /// tokens without a network call.
    #[serde(rename = "REFRESH_COMPLETE")]
    Complete { tab_id: TabId, tokens: AuthTokens },
    /// The originating tab's refresh failed; waiters may attempt their
    /// own.
    #[serde(rename = "REFRESH_FAILED")]
    Failed { tab_id: TabId, reason: String },
}

impl RefreshSignal {
    /// The tab that emitted this signal.
    pub fn tab_id(&self) -> &TabId {
        match self {
            RefreshSignal::Starting { tab_id, .. }
            | RefreshSignal::Complete { tab_id, .. }
            | RefreshSignal::Failed { tab_id, .. } => tab_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_tag_with_wire_names() {
        let signal = RefreshSignal::Starting {
            tab_id: TabId::from_string("tab-1"),
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "REFRESH_STARTING");

        let signal = RefreshSignal::Failed {
            tab_id: TabId::from_string("tab-1"),
            reason: "rotation lost".to_string(),
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "REFRESH_FAILED");
        assert_eq!(json["tab_id"], "tab-1");
    }

    #[test]
    fn signal_round_trips() {
        let signal = RefreshSignal::Complete {
            tab_id: TabId::new(),
            tokens: AuthTokens {
                access_token: "at".to_string(),
                refresh_token: Some("rt".to_string()),
                expires_at: Utc::now(),
                supabase_token: None,
                supabase_expires_at: None,
            },
        };
        let json = serde_json::to_string(&signal).unwrap();
        let back: RefreshSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signal);
    }

    #[test]
    fn tab_ids_are_unique() {
        assert_ne!(TabId::new(), TabId::new());
    }
}
