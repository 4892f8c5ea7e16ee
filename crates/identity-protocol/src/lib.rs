//! Shared contracts for the client-side authentication core.
//!
//! This crate defines:
//! - Session, token and user types persisted and exchanged by the flow
//! - The classified [`ApiError`] taxonomy that drives retry policy
//! - The [`IdentityApi`] boundary trait for the identity provider
//! - The pure [`TokenClock`] expiry comparator
//!
//! Nothing in this crate performs I/O.

mod api;
mod clock;
mod error;
mod types;

pub use api::{IdentityApi, RegisterOutcome, RegisterRequest, UserCheck, VerifiedSession};
pub use clock::TokenClock;
pub use error::{ApiError, ApiResult};
pub use types::{
    AuthMethod, AuthTokens, AuthUser, PasskeyChallenge, RegistrationOptions, SessionPatch,
    SessionRecord, UserId,
};
