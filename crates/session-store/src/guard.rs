//! Stale-write rejection.

use identity_protocol::{SessionPatch, SessionRecord, TokenClock};

/// Rejects token writes older than what is already persisted.
///
/// Applied before every token-bearing write, independently of the
/// medium's transactional guarantee, as defense against out-of-order
/// network responses.
pub struct StaleUpdateGuard;

impl StaleUpdateGuard {
    /// Whether `incoming` may be merged over `current`.
    ///
    /// Rejects only when both expiries are present and the incoming
    /// one is strictly older. Equal expiries and absent expiries on
    /// either side are accepted.
    pub fn accept(current: Option<&SessionRecord>, incoming: &SessionPatch) -> bool {
        match (current, incoming.expires_at) {
            (Some(current), Some(incoming_expiry)) => {
                !TokenClock::is_fresher(current.expires_at, incoming_expiry)
            }
            _ => true,
        }
    }
}
