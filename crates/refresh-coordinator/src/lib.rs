//! Cross-tab token refresh election.
//!
//! Multiple tabs share one persisted session. When a refresh is due,
//! every tab's timer fires at roughly the same moment; without
//! coordination each would burn the rotating refresh token. This crate
//! elects one originator over a same-origin broadcast channel and fans
//! the resulting tokens out to the waiting tabs:
//!
//! 1. A tab wanting to refresh emits `REFRESH_STARTING`.
//! 2. Tabs that saw a peer's announcement defer their own attempt and
//!    wait for `REFRESH_COMPLETE`, `REFRESH_FAILED`, or a 10s timeout.
//! 3. On success the originator emits `REFRESH_COMPLETE` with the new
//!    tokens; waiters resolve without any network call.
//! 4. On failure (or originator crash, caught by the timeout) waiters
//!    proceed with their own attempt.
//!
//! Two tabs announcing within the same tick are tolerated: both call
//! the provider and its refresh-token rotation arbitrates; the loser
//! surfaces as a local failure, never a forced sign-out.
//!
//! Without broadcast capability every tab refreshes independently.
//! That is an accepted degradation, logged once, not silently patched.

mod bus;
mod coordinator;
mod signal;

pub use bus::{LocalBus, RefreshBus, REFRESH_CHANNEL};
pub use coordinator::{RefreshCoordinator, WAITER_TIMEOUT};
pub use signal::{RefreshClaim, RefreshSignal, TabId};
