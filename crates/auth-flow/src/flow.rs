//! The top-level flow orchestrator.

use crate::context::{AuthContext, FlowConfig, FlowSnapshot};
use crate::state::{transition, AuthEvent, AuthState, Scenario};
use chrono::{DateTime, Utc};
use identity_protocol::{
    ApiError, ApiResult, AuthMethod, AuthTokens, AuthUser, IdentityApi, RegisterRequest,
    SessionPatch, TokenClock,
};
use refresh_coordinator::RefreshCoordinator;
use session_store::{SessionStore, StoreError};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use webauthn_ceremony::{CeremonyError, WebAuthnOrchestrator};

struct FlowInner {
    state: AuthState,
    context: AuthContext,
    refresh_timer: Option<JoinHandle<()>>,
}

/// Drives authentication end to end: email discovery, scenario
/// routing, passkey and emailed-code verification, token issuance and
/// proactive refresh.
///
/// One instance per tab. Entry points serialize on an internal lock
/// (the flow is cooperative, not parallel); consumers observe progress
/// through [`subscribe`](AuthFlow::subscribe).
pub struct AuthFlow {
    weak: Weak<AuthFlow>,
    api: Arc<dyn IdentityApi>,
    passkeys: WebAuthnOrchestrator,
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
    config: FlowConfig,
    inner: Mutex<FlowInner>,
    snapshot_tx: watch::Sender<FlowSnapshot>,
}

impl AuthFlow {
    pub fn new(
        api: Arc<dyn IdentityApi>,
        passkeys: WebAuthnOrchestrator,
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
        config: FlowConfig,
    ) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(FlowSnapshot::default());
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            api,
            passkeys,
            store,
            coordinator,
            config,
            inner: Mutex::new(FlowInner {
                state: AuthState::EmailEntry,
                context: AuthContext::default(),
                refresh_timer: None,
            }),
            snapshot_tx,
        })
    }

    /// Observes every `{state, context}` change.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> FlowSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// The current state.
    pub fn state(&self) -> AuthState {
        self.snapshot_tx.borrow().state
    }

    /// The authenticated user, read from the persisted session.
    pub fn current_user(&self) -> Option<AuthUser> {
        self.store.load().unwrap_or(None).map(|record| AuthUser {
            id: record.user_id,
            email: record.email,
            name: record.name,
            email_verified: record.email_verified.unwrap_or(false),
        })
    }

    /// The current session tokens, read from the persisted session.
    pub fn current_tokens(&self) -> Option<AuthTokens> {
        self.store.load().unwrap_or(None).map(|record| AuthTokens {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at: record.expires_at,
            supabase_token: record.supabase_token,
            supabase_expires_at: record.supabase_expires_at,
        })
    }

    /// Restores a persisted session at startup.
    ///
    /// An unexpired record puts the flow straight into `Authenticated`
    /// and schedules refresh. An expired record with a refresh token
    /// still resumes; the immediately-due refresh decides whether the
    /// session survives. An expired record without one is discarded.
    pub async fn resume(&self) -> AuthState {
        let mut inner = self.inner.lock().await;
        if inner.state != AuthState::EmailEntry {
            return inner.state;
        }
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return inner.state,
            Err(err) => {
                warn!(error = %err, "Could not read the persisted session");
                return inner.state;
            }
        };
        if TokenClock::is_expired(record.expires_at, Utc::now()) && record.refresh_token.is_none()
        {
            debug!("Persisted session expired with no refresh token; discarding");
            let _ = self.store.clear();
            return inner.state;
        }

        info!(user_id = %record.user_id, "Resumed persisted session");
        inner.context = AuthContext {
            email: record.email.clone(),
            user_id: Some(record.user_id.clone()),
            user_exists: true,
            email_verified: record.email_verified.unwrap_or(false),
            ..Default::default()
        };
        self.apply(&mut inner, AuthEvent::SessionRestored);
        self.schedule_refresh(&mut inner, record.expires_at);
        inner.state
    }

    /// Starts (or restarts) a flow with the given email.
    ///
    /// Drives discovery and scenario routing as far as it can without
    /// further input: registration flows run through provider
    /// registration, invitation flows all the way to `Authenticated`.
    pub async fn submit_email(&self, email: &str, invitation_token: Option<String>) -> AuthState {
        let mut inner = self.inner.lock().await;
        if inner.state == AuthState::Authenticated {
            return inner.state;
        }
        if inner.state != AuthState::EmailEntry {
            // Re-entering an email abandons the in-flight attempt.
            inner.context = AuthContext::default();
            inner.state = AuthState::EmailEntry;
        }

        let email = email.trim().to_ascii_lowercase();
        if !valid_email(&email) {
            inner.context.last_error =
                Some(ApiError::Validation("not a valid email address".to_string()));
            self.publish(&inner);
            return inner.state;
        }

        inner.context = AuthContext {
            email: email.clone(),
            invitation_token,
            ..Default::default()
        };
        self.apply(&mut inner, AuthEvent::EmailSubmitted);

        let check = {
            let api = self.api.clone();
            match self
                .call(&mut inner, || {
                    let api = api.clone();
                    let email = email.clone();
                    async move { api.check_user(&email).await }
                })
                .await
            {
                Ok(check) => check,
                Err(event) => {
                    self.fail(&mut inner, event);
                    return inner.state;
                }
            }
        };

        inner.context.user_exists = check.exists;
        inner.context.user_id = check.user_id.clone();
        inner.context.has_passkeys = check.has_passkeys;
        inner.context.email_verified = check.email_verified;

        let scenario = Scenario::detect(
            check.exists,
            inner.context.invitation_token.as_deref(),
            self.config.surface,
        );
        let Some(scenario) = scenario else {
            inner.context.last_error = Some(ApiError::Validation(
                "registration is not available here".to_string(),
            ));
            self.fail(&mut inner, AuthEvent::PermanentFailure);
            return inner.state;
        };
        inner.context.scenario = Some(scenario);
        self.apply(&mut inner, AuthEvent::ScenarioDetected(scenario));

        match scenario {
            Scenario::ExistingUserAuth => {
                inner.context.available_methods = inner.context.methods_on_offer();
                self.publish(&inner);
            }
            Scenario::IndividualRegistration => self.register_individual(&mut inner).await,
            Scenario::InvitationRegistration => self.register_invited(&mut inner).await,
        }
        inner.state
    }

    /// Picks a sign-in method for a returning user.
    pub async fn choose_auth_method(&self, method: AuthMethod) -> AuthState {
        let mut inner = self.inner.lock().await;
        if inner.state != AuthState::ExistingUserAuth {
            debug!(state = ?inner.state, "Method chosen outside method selection; ignoring");
            return inner.state;
        }
        if method == AuthMethod::Passkey
            && (!inner.context.has_passkeys || inner.context.passkey_disabled)
        {
            inner.context.last_error = Some(ApiError::Validation(
                "passkey sign-in is not available for this account".to_string(),
            ));
            self.publish(&inner);
            return inner.state;
        }

        inner.context.selected_method = Some(method);
        self.apply(&mut inner, AuthEvent::MethodChosen(method));

        match method {
            AuthMethod::Passkey => self.run_passkey(&mut inner).await,
            AuthMethod::MagicLink | AuthMethod::EmailCode => {
                let api = self.api.clone();
                let email = inner.context.email.clone();
                let sent = self
                    .call(&mut inner, || {
                        let api = api.clone();
                        let email = email.clone();
                        async move {
                            match method {
                                AuthMethod::MagicLink => api.send_magic_link(&email).await,
                                _ => api.send_email_code(&email).await,
                            }
                        }
                    })
                    .await;
                match sent {
                    Ok(()) => {
                        self.apply(&mut inner, AuthEvent::EmailSent);
                    }
                    Err(event) => self.fail(&mut inner, event),
                }
            }
        }
        inner.state
    }

    /// Verifies an emailed code, for both sign-in and post-registration
    /// email verification. A call while already authenticated is a
    /// no-op confirmation.
    pub async fn submit_code(&self, code: &str) -> AuthState {
        let mut inner = self.inner.lock().await;
        if inner.state == AuthState::Authenticated {
            return inner.state;
        }
        if !matches!(
            inner.state,
            AuthState::EmailLinkSent | AuthState::EmailVerificationRequired
        ) {
            debug!(state = ?inner.state, "Code submitted outside a verification state; ignoring");
            return inner.state;
        }

        let code = code.trim().to_string();
        if code.is_empty() {
            inner.context.last_error =
                Some(ApiError::Validation("verification code is empty".to_string()));
            self.publish(&inner);
            return inner.state;
        }
        if inner.state == AuthState::EmailLinkSent {
            self.apply(&mut inner, AuthEvent::CodeSubmitted);
        }

        let api = self.api.clone();
        let email = inner.context.email.clone();
        let verified = match self
            .call(&mut inner, || {
                let api = api.clone();
                let email = email.clone();
                let code = code.clone();
                async move { api.verify_email_code(&email, &code).await }
            })
            .await
        {
            Ok(verified) => verified,
            Err(event) => {
                self.fail(&mut inner, event);
                return inner.state;
            }
        };

        let method = inner.context.selected_method.unwrap_or(AuthMethod::EmailCode);
        self.apply(&mut inner, AuthEvent::CodeVerified);
        self.issue(&mut inner, &verified.user, &verified.tokens, method);
        inner.state
    }

    /// Runs a speculative conditional passkey ceremony for an email
    /// still being typed. Nothing on this path may disturb the flow: a
    /// missing credential, a dismissal or any provider error leaves
    /// state and context untouched, and the ceremony pends without the
    /// flow lock, so explicit actions stay responsive while it waits.
    pub async fn try_conditional_passkey(&self, email: &str) -> AuthState {
        if let Some(state) = self.outside_conditional_window().await {
            return state;
        }

        // The ceremony waits passively while the user keeps typing;
        // the lock is re-taken only once a result is in hand.
        let challenge = match self.passkeys.get_authentication_challenge(email).await {
            Ok(challenge) => challenge,
            Err(err) => {
                debug!(error = %err, "Conditional challenge fetch failed");
                return self.state();
            }
        };
        let outcome = match self.passkeys.authenticate(&challenge, true).await {
            Ok(Some(outcome)) => outcome,
            // Conditional mode reports every failure as "no result".
            Ok(None) | Err(_) => return self.state(),
        };
        if let Some(state) = self.outside_conditional_window().await {
            debug!(state = ?state, "Flow moved on during the conditional ceremony; discarding");
            return state;
        }

        let user_id = match self.api.check_user(email).await {
            Ok(check) => match check.user_id {
                Some(user_id) => user_id,
                None => return self.state(),
            },
            Err(err) => {
                debug!(error = %err, "Conditional discovery failed");
                return self.state();
            }
        };
        let verified = match self.api.verify_passkey(&user_id, outcome.response).await {
            Ok(verified) => verified,
            Err(err) => {
                debug!(error = %err, "Conditional passkey verification failed");
                return self.state();
            }
        };

        let mut inner = self.inner.lock().await;
        if !matches!(
            inner.state,
            AuthState::EmailEntry | AuthState::ExistingUserAuth
        ) {
            debug!(state = ?inner.state, "Conditional result arrived late; discarding");
            return inner.state;
        }
        inner.context.email = verified.user.email.clone();
        inner.context.user_id = Some(verified.user.id.clone());
        inner.context.user_exists = true;
        self.apply(&mut inner, AuthEvent::ConditionalVerified);
        self.issue(&mut inner, &verified.user, &verified.tokens, AuthMethod::Passkey);
        inner.state
    }

    /// `Some(state)` when the flow is no longer in a state where a
    /// speculative conditional result may land.
    async fn outside_conditional_window(&self) -> Option<AuthState> {
        let inner = self.inner.lock().await;
        match inner.state {
            AuthState::EmailEntry | AuthState::ExistingUserAuth => None,
            state => Some(state),
        }
    }

    /// Signs out from any state. Purely client-side: clears the
    /// persisted session, cancels the refresh timer and resets context.
    pub async fn sign_out(&self) -> AuthState {
        let mut inner = self.inner.lock().await;
        if let Some(timer) = inner.refresh_timer.take() {
            timer.abort();
        }
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Could not clear the persisted session");
        }
        info!("Signed out");
        inner.context = AuthContext::default();
        self.apply(&mut inner, AuthEvent::SignedOut);
        inner.state
    }

    // === passkey path ===

    async fn run_passkey(&self, inner: &mut FlowInner) {
        let email = inner.context.email.clone();
        let challenge = match self
            .call(inner, || self.passkeys.get_authentication_challenge(&email))
            .await
        {
            Ok(challenge) => challenge,
            Err(event) => {
                self.fail(inner, event);
                return;
            }
        };
        self.apply(inner, AuthEvent::ChallengeReceived);

        match self.passkeys.authenticate(&challenge, false).await {
            Ok(Some(outcome)) => {
                let Some(user_id) = inner.context.user_id.clone() else {
                    inner.context.last_error = Some(ApiError::Validation(
                        "discovery returned no user id for this account".to_string(),
                    ));
                    self.fail(inner, AuthEvent::PermanentFailure);
                    return;
                };
                let api = self.api.clone();
                let verified = match self
                    .call(inner, || {
                        let api = api.clone();
                        let user_id = user_id.clone();
                        let response = outcome.response.clone();
                        async move { api.verify_passkey(&user_id, response).await }
                    })
                    .await
                {
                    Ok(verified) => verified,
                    Err(event) => {
                        self.fail(inner, event);
                        return;
                    }
                };
                self.apply(inner, AuthEvent::CeremonyVerified);
                self.issue(inner, &verified.user, &verified.tokens, AuthMethod::Passkey);
            }
            Err(CeremonyError::NoCredential) => {
                info!("No passkey credential available; disabling the option");
                inner.context.passkey_disabled = true;
                inner.context.available_methods = inner.context.methods_on_offer();
                self.apply(inner, AuthEvent::PasskeyUnavailable);
            }
            Ok(None) | Err(_) => {
                // Cancel, timeout or platform trouble: back to method
                // selection with the passkey option still on offer.
                debug!("Passkey ceremony did not complete");
                inner.context.available_methods = inner.context.methods_on_offer();
                self.apply(inner, AuthEvent::PasskeyUnavailable);
            }
        }
    }

    // === registration ===

    async fn register_individual(&self, inner: &mut FlowInner) {
        let api = self.api.clone();
        let request = RegisterRequest {
            email: inner.context.email.clone(),
            name: None,
            invitation_token: None,
        };
        let outcome = match self
            .call(inner, || {
                let api = api.clone();
                let request = request.clone();
                async move { api.register(request).await }
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(event) => {
                self.fail(inner, event);
                return;
            }
        };
        inner.context.user_id = Some(outcome.user.id.clone());
        // New accounts start unverified; the emailed code proves the
        // address before any tokens are issued.
        self.apply(inner, AuthEvent::Registered {
            tokens_issued: false,
        });

        let email = inner.context.email.clone();
        let sent = self
            .call(inner, || {
                let api = api.clone();
                let email = email.clone();
                async move { api.send_email_code(&email).await }
            })
            .await;
        match sent {
            Ok(()) => {
                inner.context.selected_method = Some(AuthMethod::EmailCode);
                self.publish(inner);
            }
            Err(event) => self.fail(inner, event),
        }
    }

    async fn register_invited(&self, inner: &mut FlowInner) {
        let api = self.api.clone();
        let request = RegisterRequest {
            email: inner.context.email.clone(),
            name: None,
            invitation_token: inner.context.invitation_token.clone(),
        };
        let outcome = match self
            .call(inner, || {
                let api = api.clone();
                let request = request.clone();
                async move { api.register(request).await }
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(event) => {
                self.fail(inner, event);
                return;
            }
        };
        let Some(tokens) = outcome.tokens else {
            inner.context.last_error = Some(ApiError::rejected(
                400,
                "invitation registration returned no session",
            ));
            self.fail(inner, AuthEvent::PermanentFailure);
            return;
        };
        inner.context.user_id = Some(outcome.user.id.clone());
        inner.context.email_verified = outcome.user.email_verified;
        self.apply(inner, AuthEvent::Registered { tokens_issued: true });
        // The invitation arrived by email, so the link it carried is
        // the proof of possession.
        self.issue(inner, &outcome.user, &tokens, AuthMethod::MagicLink);
    }

    // === token issuance and refresh ===

    /// Persists issued tokens and completes the flow. Idempotent:
    /// re-entry while already authenticated confirms without a
    /// re-save.
    fn issue(&self, inner: &mut FlowInner, user: &AuthUser, tokens: &AuthTokens, method: AuthMethod) {
        if inner.state == AuthState::Authenticated {
            return;
        }

        let patch = SessionPatch::from_issuance(user, tokens, method, Utc::now());
        let record = match self.store.save(&patch) {
            Ok(record) => Some(record),
            Err(StoreError::StaleWrite) => {
                // A fresher write (most likely another tab) already
                // landed; adopt what is stored.
                debug!(user_id = %user.id, "Issuance superseded by a fresher persisted session");
                self.store.load().unwrap_or(None)
            }
            Err(err) => {
                error!(error = %err, "Could not persist the session; continuing in memory");
                None
            }
        };

        inner.context.email_verified = user.email_verified;
        inner.context.retry_count = 0;
        inner.context.last_error = None;
        let expires_at = record.map(|r| r.expires_at).unwrap_or(tokens.expires_at);
        self.schedule_refresh(inner, expires_at);
        info!(user_id = %user.id, method = %method, "Authenticated");
        self.apply(inner, AuthEvent::TokensPersisted);
    }

    fn schedule_refresh(&self, inner: &mut FlowInner, expires_at: DateTime<Utc>) {
        // One timer per tab; rescheduling cancels the previous one.
        if let Some(timer) = inner.refresh_timer.take() {
            timer.abort();
        }
        let due = TokenClock::refresh_due_at(expires_at, self.config.refresh_before);
        let delay = TokenClock::until(due, Utc::now());
        debug!(delay_secs = delay.as_secs(), "Scheduled token refresh");
        inner.refresh_timer = Some(self.spawn_refresh(delay));
    }

    fn schedule_refresh_retry(&self, inner: &mut FlowInner) {
        if let Some(timer) = inner.refresh_timer.take() {
            timer.abort();
        }
        let delay = self.config.refresh_retry_after;
        debug!(delay_secs = delay.as_secs(), "Scheduled refresh retry");
        inner.refresh_timer = Some(self.spawn_refresh(delay));
    }

    fn spawn_refresh(&self, delay: std::time::Duration) -> JoinHandle<()> {
        let flow = self.weak.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The consumer may be gone by the time the timer fires.
            let Some(flow) = flow.upgrade() else { return };
            flow.refresh_session().await;
        })
    }

    /// Refreshes the persisted session under cross-tab election.
    ///
    /// A refresh failure never signs the user out while the current
    /// access token remains unexpired; the session stays valid until
    /// natural expiry and the refresh is retried.
    pub async fn refresh_session(&self) {
        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Could not read the session for refresh");
                return;
            }
        };
        let Some(refresh_token) = record.refresh_token.clone() else {
            debug!("No refresh token; the session runs to natural expiry");
            return;
        };

        let api = self.api.clone();
        let result = self
            .coordinator
            .refresh(|| async move { api.refresh_token(&refresh_token).await })
            .await;

        let mut inner = self.inner.lock().await;
        // Sign-out can land while the provider call is in flight; a
        // session that is gone (or replaced by another user's) takes
        // the outcome with it.
        match self.store.load() {
            Ok(Some(current)) if current.user_id == record.user_id => {}
            _ => {
                debug!("Session gone during refresh; discarding the outcome");
                return;
            }
        }
        match result {
            Ok(tokens) => {
                let patch = SessionPatch::from_refresh(record.user_id.clone(), &tokens, Utc::now());
                match self.store.save(&patch) {
                    Ok(saved) => {
                        info!(user_id = %saved.user_id, "Session refreshed");
                        self.schedule_refresh(&mut inner, saved.expires_at);
                    }
                    Err(StoreError::StaleWrite) => {
                        // Another tab persisted a fresher session.
                        if let Ok(Some(current)) = self.store.load() {
                            self.schedule_refresh(&mut inner, current.expires_at);
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "Could not persist refreshed tokens");
                        self.schedule_refresh(&mut inner, tokens.expires_at);
                    }
                }
            }
            Err(err) => {
                let expired = TokenClock::is_expired(record.expires_at, Utc::now());
                if expired && err.is_permanent() {
                    warn!(error = %err, "Session expired and refresh was rejected; signing out");
                    let _ = self.store.clear();
                    inner.context = AuthContext {
                        last_error: Some(err),
                        ..Default::default()
                    };
                    self.apply(&mut inner, AuthEvent::SignedOut);
                } else {
                    warn!(error = %err, "Refresh failed; will retry");
                    inner.context.last_error = Some(err);
                    self.schedule_refresh_retry(&mut inner);
                    self.publish(&inner);
                }
            }
        }
    }

    // === plumbing ===

    /// Applies an event through the transition table. Events the table
    /// rejects are ignored.
    fn apply(&self, inner: &mut FlowInner, event: AuthEvent) -> bool {
        match transition(inner.state, &event) {
            Some(next) => {
                debug!(from = ?inner.state, to = ?next, event = ?event, "State transition");
                inner.state = next;
                self.publish(inner);
                true
            }
            None => {
                debug!(state = ?inner.state, event = ?event, "Event not applicable; ignoring");
                false
            }
        }
    }

    fn publish(&self, inner: &FlowInner) {
        self.snapshot_tx.send_replace(FlowSnapshot {
            state: inner.state,
            context: inner.context.clone(),
        });
    }

    /// Runs a provider call under the transient-retry policy. The
    /// returned event says how to fail when retries run out or the
    /// error is permanent.
    async fn call<T, F, Fut>(&self, inner: &mut FlowInner, mut op: F) -> Result<T, AuthEvent>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match op().await {
                Ok(value) => {
                    inner.context.retry_count = 0;
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempts < self.config.max_attempts => {
                    inner.context.retry_count = attempts;
                    inner.context.last_error = Some(err);
                    warn!(attempt = attempts, "Transient provider failure; retrying");
                    self.publish(inner);
                }
                Err(err) => {
                    let event = if err.is_transient() {
                        AuthEvent::RetriesExhausted
                    } else {
                        AuthEvent::PermanentFailure
                    };
                    inner.context.last_error = Some(err);
                    return Err(event);
                }
            }
        }
    }

    fn fail(&self, inner: &mut FlowInner, event: AuthEvent) {
        if event == AuthEvent::PermanentFailure {
            inner.context = inner.context.reset_keeping_error();
        }
        self.apply(inner, event);
    }
}

impl Drop for AuthFlow {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.get_mut().refresh_timer.take() {
            timer.abort();
        }
    }
}

fn valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}
