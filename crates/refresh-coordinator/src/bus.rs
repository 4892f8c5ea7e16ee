//! Broadcast bus abstraction over the same-origin channel.

use crate::signal::RefreshSignal;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Name of the same-origin broadcast channel carrying refresh signals.
pub const REFRESH_CHANNEL: &str = "auth-refresh";

/// The same-origin broadcast seam.
///
/// A real deployment backs this with the platform's broadcast channel;
/// tests and single-context setups use [`LocalBus`]. Publishing is
/// fire-and-forget: a bus with no listeners drops the signal.
pub trait RefreshBus: Send + Sync {
    /// Publish a signal to every subscribed context, including the
    /// publisher's own subscriptions.
    fn publish(&self, signal: &RefreshSignal);

    /// Subscribe to signals published after this call.
    fn subscribe(&self) -> broadcast::Receiver<RefreshSignal>;
}

/// In-process bus over a tokio broadcast channel. Simulates multiple
/// tabs sharing one origin; used throughout the coordinator tests.
pub struct LocalBus {
    sender: broadcast::Sender<RefreshSignal>,
}

impl LocalBus {
    /// Creates a bus with room for a small backlog of signals.
    pub fn new() -> Arc<Self> {
        let (sender, _) = broadcast::channel(32);
        Arc::new(Self { sender })
    }
}

impl RefreshBus for LocalBus {
    fn publish(&self, signal: &RefreshSignal) {
        // No subscribers is fine; the signal just goes nowhere.
        let _ = self.sender.send(signal.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<RefreshSignal> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::TabId;
    use chrono::Utc;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = LocalBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let signal = RefreshSignal::Starting {
            tab_id: TabId::from_string("tab-1"),
            started_at: Utc::now(),
        };
        bus.publish(&signal);

        assert_eq!(rx1.recv().await.unwrap(), signal);
        assert_eq!(rx2.recv().await.unwrap(), signal);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = LocalBus::new();
        bus.publish(&RefreshSignal::Failed {
            tab_id: TabId::new(),
            reason: "nobody listening".to_string(),
        });
    }

    #[tokio::test]
    async fn subscription_misses_earlier_signals() {
        let bus = LocalBus::new();
        bus.publish(&RefreshSignal::Starting {
            tab_id: TabId::new(),
            started_at: Utc::now(),
        });

        let mut rx = bus.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
