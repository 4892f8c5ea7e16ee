//! States, events and the transition table.

use identity_protocol::AuthMethod;
use serde::{Deserialize, Serialize};

/// Where the sign-in surface is hosted. Public surfaces allow
/// self-service registration; invitation-only surfaces require a
/// token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Public,
    InvitationOnly,
}

/// Which flow email discovery routed into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// New account on a public surface; email verification mandatory.
    IndividualRegistration,
    /// New account via invitation; token possession pre-verifies the
    /// email, so the verification step is skipped.
    InvitationRegistration,
    /// The account exists; offer passkey first, emailed fallbacks
    /// second.
    ExistingUserAuth,
}

impl Scenario {
    /// Routes a discovered email. Pure; no side effects.
    ///
    /// An invitation token wins over the surface: possession both
    /// authorizes registration and proves the address. `None` means
    /// there is no way forward (unknown user, invitation-only surface,
    /// no token).
    pub fn detect(
        user_exists: bool,
        invitation_token: Option<&str>,
        surface: Surface,
    ) -> Option<Self> {
        if user_exists {
            Some(Scenario::ExistingUserAuth)
        } else if invitation_token.is_some() {
            Some(Scenario::InvitationRegistration)
        } else if surface == Surface::Public {
            Some(Scenario::IndividualRegistration)
        } else {
            None
        }
    }
}

/// States of the authentication flow.
///
/// `EmailEntry` is initial; `Authenticated` and `ErrorExhausted` are
/// terminal. `ExistingUserAuth` doubles as the method selection screen
/// for returning users.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    EmailEntry,
    UserLookup,
    IndividualRegistration,
    InvitationRegistration,
    EmailVerificationRequired,
    ExistingUserAuth,
    PasskeyAuth,
    BiometricPrompt,
    EmailLinkAuth,
    EmailLinkSent,
    EmailLinkVerification,
    TokenIssuance,
    Authenticated,
    ErrorExhausted,
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::ErrorExhausted)
    }
}

/// Events driving transitions.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    EmailSubmitted,
    ScenarioDetected(Scenario),
    /// Registration completed. Invitation registrations come back with
    /// tokens; public ones do not until the email is verified.
    Registered { tokens_issued: bool },
    MethodChosen(AuthMethod),
    ChallengeReceived,
    CeremonyVerified,
    /// The passkey path ended locally (cancel, no credential); fall
    /// back to method selection.
    PasskeyUnavailable,
    EmailSent,
    CodeSubmitted,
    CodeVerified,
    /// A speculative conditional ceremony completed and verified.
    ConditionalVerified,
    /// A persisted session was restored at startup.
    SessionRestored,
    TokensPersisted,
    SignedOut,
    PermanentFailure,
    RetriesExhausted,
}

/// The transition table.
///
/// Returns `None` when the event does not apply in the given state;
/// callers treat that as a no-op.
pub fn transition(state: AuthState, event: &AuthEvent) -> Option<AuthState> {
    use AuthEvent as E;
    use AuthState as S;

    match (state, event) {
        // Sign-out and permanent failures route home from anywhere.
        (_, E::SignedOut) | (_, E::PermanentFailure) => Some(S::EmailEntry),
        (s, E::RetriesExhausted) if !s.is_terminal() => Some(S::ErrorExhausted),

        (S::EmailEntry, E::EmailSubmitted) => Some(S::UserLookup),
        (S::UserLookup, E::ScenarioDetected(scenario)) => Some(match scenario {
            Scenario::IndividualRegistration => S::IndividualRegistration,
            Scenario::InvitationRegistration => S::InvitationRegistration,
            Scenario::ExistingUserAuth => S::ExistingUserAuth,
        }),

        (S::IndividualRegistration, E::Registered { tokens_issued: false }) => {
            Some(S::EmailVerificationRequired)
        }
        (S::InvitationRegistration, E::Registered { tokens_issued: true }) => {
            Some(S::TokenIssuance)
        }
        (S::EmailVerificationRequired, E::CodeVerified) => Some(S::TokenIssuance),

        (S::ExistingUserAuth, E::MethodChosen(AuthMethod::Passkey)) => Some(S::PasskeyAuth),
        (S::ExistingUserAuth, E::MethodChosen(_)) => Some(S::EmailLinkAuth),
        (S::PasskeyAuth, E::ChallengeReceived) => Some(S::BiometricPrompt),
        (S::PasskeyAuth | S::BiometricPrompt, E::PasskeyUnavailable) => Some(S::ExistingUserAuth),
        (S::BiometricPrompt, E::CeremonyVerified) => Some(S::TokenIssuance),

        (S::EmailLinkAuth, E::EmailSent) => Some(S::EmailLinkSent),
        (S::EmailLinkSent, E::CodeSubmitted) => Some(S::EmailLinkVerification),
        (S::EmailLinkVerification, E::CodeVerified) => Some(S::TokenIssuance),

        (S::EmailEntry | S::ExistingUserAuth, E::ConditionalVerified) => Some(S::TokenIssuance),
        (S::EmailEntry, E::SessionRestored) => Some(S::Authenticated),

        (S::TokenIssuance, E::TokensPersisted) => Some(S::Authenticated),

        _ => None,
    }
}
