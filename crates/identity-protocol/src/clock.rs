//! Pure expiry and freshness comparisons.

use chrono::{DateTime, Duration, Utc};

/// Pure comparator for token expiry. The wall clock is always a
/// parameter; this type never reads time itself.
pub struct TokenClock;

impl TokenClock {
    /// Whether a token with the given expiry is expired at `now`.
    pub fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        expires_at <= now
    }

    /// The instant at which a proactive refresh should fire.
    pub fn refresh_due_at(expires_at: DateTime<Utc>, refresh_before: Duration) -> DateTime<Utc> {
        expires_at - refresh_before
    }

    /// Time remaining until `deadline`, clamped to zero when the
    /// deadline has already passed.
    pub fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
        (deadline - now).to_std().unwrap_or(std::time::Duration::ZERO)
    }

    /// Whether a candidate expiry is strictly fresher than the current
    /// one. Equal expiries are not fresher.
    pub fn is_fresher(candidate: DateTime<Utc>, current: DateTime<Utc>) -> bool {
        candidate > current
    }
}
