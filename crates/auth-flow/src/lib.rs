//! The client-side authentication flow.
//!
//! This crate ties the rest of the core together:
//! - [`AuthState`] and the explicit transition table in
//!   [`transition`], covering discovery, registration, passkey and
//!   emailed-code paths
//! - [`Scenario::detect`] - pure routing of a discovered email into
//!   self-service registration, invitation registration or returning
//!   sign-in
//! - [`AuthFlow`] - the per-tab orchestrator: imperative entry points
//!   for the UI, `watch`-based snapshots out, session persistence and
//!   cross-tab coordinated refresh underneath
//!
//! Every verification path converges on one token issuance step that
//! persists the session and schedules refresh ahead of expiry.

mod context;
mod flow;
mod state;

pub use context::{AuthContext, FlowConfig, FlowSnapshot};
pub use flow::AuthFlow;
pub use state::{transition, AuthEvent, AuthState, Scenario, Surface};
