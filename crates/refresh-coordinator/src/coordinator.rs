//! The per-tab refresh coordinator.

use crate::bus::RefreshBus;
use crate::signal::{RefreshClaim, RefreshSignal, TabId};
use chrono::Utc;
use identity_protocol::{ApiResult, AuthTokens};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a deferring tab waits for a peer's refresh outcome before
/// proceeding on its own. Covers the originator crashing mid-refresh.
pub const WAITER_TIMEOUT: Duration = Duration::from_secs(10);

enum WaitOutcome {
    Tokens(AuthTokens),
    Proceed,
}

/// Ensures at most one network refresh call per session is in flight
/// across all tabs, fanning the result out to the rest.
///
/// Must be constructed inside a tokio runtime; a background listener
/// tracks peer announcements. Dropping the coordinator aborts the
/// listener and releases the broadcast subscription.
pub struct RefreshCoordinator {
    tab_id: TabId,
    bus: Option<Arc<dyn RefreshBus>>,
    claim: Arc<Mutex<Option<RefreshClaim>>>,
    listener: Option<JoinHandle<()>>,
}

impl RefreshCoordinator {
    /// Creates a coordinator with a fresh tab identity.
    ///
    /// `None` for the bus means broadcast capability is unavailable;
    /// the coordinator then runs every refresh independently.
    pub fn new(bus: Option<Arc<dyn RefreshBus>>) -> Self {
        Self::with_tab_id(TabId::new(), bus)
    }

    /// Creates a coordinator with an explicit tab identity.
    pub fn with_tab_id(tab_id: TabId, bus: Option<Arc<dyn RefreshBus>>) -> Self {
        let claim = Arc::new(Mutex::new(None));
        let listener = match &bus {
            Some(bus) => Some(Self::spawn_listener(
                bus.clone(),
                tab_id.clone(),
                claim.clone(),
            )),
            None => {
                info!(
                    tab_id = %tab_id,
                    "Broadcast channel unavailable; every tab will refresh independently"
                );
                None
            }
        };
        Self {
            tab_id,
            bus,
            claim,
            listener,
        }
    }

    /// This tab's identity on the channel.
    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Runs `op` (the actual network refresh) under cross-tab
    /// election.
    ///
    /// If a peer already announced a refresh, this tab defers and
    /// adopts the peer's tokens when they arrive; on peer failure or
    /// after [`WAITER_TIMEOUT`] it falls through to its own attempt.
    /// Otherwise it announces, runs `op`, and publishes the outcome.
    pub async fn refresh<F, Fut>(&self, op: F) -> ApiResult<AuthTokens>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<AuthTokens>>,
    {
        let Some(bus) = self.bus.as_ref() else {
            debug!(tab_id = %self.tab_id, "Refreshing without coordination");
            return op().await;
        };

        // Subscribe before inspecting the claim so a completion that
        // lands in between is not missed.
        let mut rx = bus.subscribe();
        if let Some(claim) = self.active_claim() {
            info!(tab_id = %self.tab_id, claimant = %claim.tab_id, "Peer refresh in flight; deferring");
            if let WaitOutcome::Tokens(tokens) = self.wait_for_outcome(&mut rx, &claim.tab_id).await
            {
                return Ok(tokens);
            }
        }
        drop(rx);

        bus.publish(&RefreshSignal::Starting {
            tab_id: self.tab_id.clone(),
            started_at: Utc::now(),
        });
        info!(tab_id = %self.tab_id, "Originating token refresh");

        match op().await {
            Ok(tokens) => {
                bus.publish(&RefreshSignal::Complete {
                    tab_id: self.tab_id.clone(),
                    tokens: tokens.clone(),
                });
                Ok(tokens)
            }
            Err(err) => {
                warn!(tab_id = %self.tab_id, error = %err, "Token refresh failed");
                bus.publish(&RefreshSignal::Failed {
                    tab_id: self.tab_id.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn wait_for_outcome(
        &self,
        rx: &mut broadcast::Receiver<RefreshSignal>,
        claimant: &TabId,
    ) -> WaitOutcome {
        let deadline = tokio::time::sleep(WAITER_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    warn!(claimant = %claimant, "Timed out waiting for a peer refresh; proceeding independently");
                    self.clear_claim(claimant);
                    return WaitOutcome::Proceed;
                }
                received = rx.recv() => match received {
                    Ok(RefreshSignal::Complete { tab_id, tokens }) if tab_id != self.tab_id => {
                        debug!(origin = %tab_id, "Adopting tokens from a peer refresh");
                        return WaitOutcome::Tokens(tokens);
                    }
                    Ok(RefreshSignal::Failed { tab_id, reason }) if tab_id == *claimant => {
                        debug!(origin = %tab_id, %reason, "Peer refresh failed; proceeding independently");
                        self.clear_claim(claimant);
                        return WaitOutcome::Proceed;
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Refresh listener lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return WaitOutcome::Proceed,
                }
            }
        }
    }

    /// Returns the current peer claim, discarding one old enough that
    /// its originator must have died without reporting back.
    fn active_claim(&self) -> Option<RefreshClaim> {
        let mut guard = self.claim.lock().expect("lock poisoned");
        let stale = guard.as_ref().is_some_and(|c| {
            (Utc::now() - c.started_at)
                .to_std()
                .is_ok_and(|age| age > WAITER_TIMEOUT)
        });
        if stale {
            *guard = None;
        }
        guard.clone()
    }

    fn clear_claim(&self, claimant: &TabId) {
        let mut guard = self.claim.lock().expect("lock poisoned");
        if guard.as_ref().is_some_and(|c| c.tab_id == *claimant) {
            *guard = None;
        }
    }

    fn spawn_listener(
        bus: Arc<dyn RefreshBus>,
        own_tab: TabId,
        claim: Arc<Mutex<Option<RefreshClaim>>>,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(RefreshSignal::Starting { tab_id, started_at }) if tab_id != own_tab => {
                        let mut guard = claim.lock().expect("lock poisoned");
                        *guard = Some(RefreshClaim { tab_id, started_at });
                    }
                    Ok(RefreshSignal::Complete { tab_id, .. })
                    | Ok(RefreshSignal::Failed { tab_id, .. }) => {
                        let mut guard = claim.lock().expect("lock poisoned");
                        if guard.as_ref().is_some_and(|c| c.tab_id == tab_id) {
                            *guard = None;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use chrono::Duration as ChronoDuration;
    use identity_protocol::ApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared(bus: &Arc<LocalBus>) -> Option<Arc<dyn RefreshBus>> {
        let bus: Arc<dyn RefreshBus> = bus.clone();
        Some(bus)
    }

    fn tokens(tag: &str) -> AuthTokens {
        AuthTokens {
            access_token: format!("at-{tag}"),
            refresh_token: Some(format!("rt-{tag}")),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            supabase_token: None,
            supabase_expires_at: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deferring_tab_adopts_originator_tokens() {
        let bus = LocalBus::new();
        let a = Arc::new(RefreshCoordinator::new(shared(&bus)));
        let b = RefreshCoordinator::new(shared(&bus));

        let calls = Arc::new(AtomicUsize::new(0));

        let a_calls = calls.clone();
        let a_task = {
            let a = a.clone();
            tokio::spawn(async move {
                a.refresh(|| async move {
                    a_calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(tokens("a"))
                })
                .await
            })
        };

        // Let A's announcement reach B's listener.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let b_calls = calls.clone();
        let b_result = b
            .refresh(|| async move {
                b_calls.fetch_add(1, Ordering::SeqCst);
                Ok(tokens("b"))
            })
            .await
            .unwrap();

        let a_result = a_task.await.unwrap().unwrap();

        // Exactly one network call; both tabs converge on its tokens.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_result, a_result);
        assert_eq!(b_result.access_token, "at-a");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_when_originator_disappears() {
        let bus = LocalBus::new();
        let b = RefreshCoordinator::new(shared(&bus));

        // A tab announces and then crashes without reporting back.
        bus.publish(&RefreshSignal::Starting {
            tab_id: TabId::from_string("ghost-tab"),
            started_at: Utc::now(),
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let b_calls = calls.clone();
        let started = tokio::time::Instant::now();

        let result = b
            .refresh(|| async move {
                b_calls.fetch_add(1, Ordering::SeqCst);
                Ok(tokens("b"))
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= WAITER_TIMEOUT);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.access_token, "at-b");
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_proceeds_after_originator_failure() {
        let bus = LocalBus::new();
        let a = Arc::new(RefreshCoordinator::new(shared(&bus)));
        let b = RefreshCoordinator::new(shared(&bus));

        let a_task = {
            let a = a.clone();
            tokio::spawn(async move {
                a.refresh(|| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err::<AuthTokens, _>(ApiError::Network("connection reset".to_string()))
                })
                .await
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;

        let calls = Arc::new(AtomicUsize::new(0));
        let b_calls = calls.clone();
        let result = b
            .refresh(|| async move {
                b_calls.fetch_add(1, Ordering::SeqCst);
                Ok(tokens("b"))
            })
            .await
            .unwrap();

        assert!(a_task.await.unwrap().is_err());
        // B waited, saw the failure, then made its own call.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.access_token, "at-b");
    }

    #[tokio::test(start_paused = true)]
    async fn unseen_announcements_race_and_both_refresh() {
        // Same-tick originators: neither listener has processed the
        // other's announcement, so both call the provider. Tolerated;
        // refresh-token rotation arbitrates on the server.
        let bus = LocalBus::new();
        let a = RefreshCoordinator::new(shared(&bus));
        let b = RefreshCoordinator::new(shared(&bus));

        let calls = Arc::new(AtomicUsize::new(0));
        let a_calls = calls.clone();
        let b_calls = calls.clone();

        let (ra, rb) = tokio::join!(
            a.refresh(|| async move {
                a_calls.fetch_add(1, Ordering::SeqCst);
                Ok(tokens("a"))
            }),
            b.refresh(|| async move {
                b_calls.fetch_add(1, Ordering::SeqCst);
                Ok(tokens("b"))
            }),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test]
    async fn no_bus_refreshes_independently() {
        let a = RefreshCoordinator::new(None);
        let b = RefreshCoordinator::new(None);

        let calls = Arc::new(AtomicUsize::new(0));
        let a_calls = calls.clone();
        let b_calls = calls.clone();

        a.refresh(|| async move {
            a_calls.fetch_add(1, Ordering::SeqCst);
            Ok(tokens("a"))
        })
        .await
        .unwrap();
        b.refresh(|| async move {
            b_calls.fetch_add(1, Ordering::SeqCst);
            Ok(tokens("b"))
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn own_failure_propagates_to_caller() {
        let bus = LocalBus::new();
        let a = RefreshCoordinator::new(shared(&bus));
        let mut rx = bus.subscribe();

        let result = a
            .refresh(|| async move {
                Err::<AuthTokens, _>(ApiError::rejected(401, "rotation lost"))
            })
            .await;
        assert!(matches!(
            result,
            Err(ApiError::ProviderRejected { status: 401, .. })
        ));

        // Starting then Failed were both announced.
        assert!(matches!(rx.recv().await, Ok(RefreshSignal::Starting { .. })));
        assert!(matches!(rx.recv().await, Ok(RefreshSignal::Failed { .. })));
    }
}
