//! Session persistence for the authentication core.
//!
//! This crate provides:
//! - [`SessionMedium`] - the key-value storage seam (transactional
//!   when the backing medium supports it)
//! - [`SessionStore`] - atomic partial merge of [`SessionPatch`]
//!   writes with read-back of the persisted record
//! - [`StaleUpdateGuard`] - rejection of token writes older than what
//!   is already persisted
//! - [`MemoryMedium`] - mutex-backed medium used for tests and as the
//!   degraded fallback when the real medium is unavailable
//!
//! [`SessionPatch`]: identity_protocol::SessionPatch

mod guard;
mod medium;
mod store;

pub use guard::StaleUpdateGuard;
pub use medium::{MediumError, MemoryMedium, SessionMedium, UpdateDecision};
pub use store::{SessionStore, SESSION_KEY};

use thiserror::Error;

/// Error type for session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium failed.
    #[error("storage medium error: {0}")]
    Medium(#[from] MediumError),

    /// A record cannot be created without its mandatory fields.
    #[error("incomplete session record: missing {0}")]
    IncompleteRecord(&'static str),

    /// The incoming write carries an older expiry than the persisted
    /// record. Logged and dropped by callers, never surfaced to users.
    #[error("stale session write rejected")]
    StaleWrite,

    /// The record could not be serialized for persistence.
    #[error("session encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result type for session store operations.
pub type StoreResult<T> = Result<T, StoreError>;
