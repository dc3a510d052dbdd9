//! Scoped release of tracked connections and subscriptions.
//!
//! Dropping a guard closes what it tracks, so gauges return to zero on every
//! exit path: normal completion, `?` errors, panics and task cancellation.

use std::sync::Arc;

use crate::statistics::tracker::{
    ConnectionId, EngineStatisticsTracker, StatisticsError, SubscriptionId,
};
use crate::statistics::trigger::{TransportKind, TriggerSource};

impl EngineStatisticsTracker {
    /// Open a connection that is closed when the guard is dropped.
    pub fn track_connection(self: &Arc<Self>, transport: TransportKind) -> ConnectionGuard {
        ConnectionGuard {
            id: self.open_connection(transport),
            transport,
            tracker: Arc::clone(self),
        }
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: Arc<EngineStatisticsTracker>,
    id: ConnectionId,
    transport: TransportKind,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Start a subscription owned by this connection.
    pub fn subscribe(&self, source: &TriggerSource) -> Result<SubscriptionGuard, StatisticsError> {
        let id = self.tracker.start_subscription(self.id, source)?;
        Ok(SubscriptionGuard {
            tracker: Arc::clone(&self.tracker),
            id,
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.close_connection(self.id);
    }
}

/// Guard that tracks a subscription's lifetime.
#[derive(Debug)]
pub struct SubscriptionGuard {
    tracker: Arc<EngineStatisticsTracker>,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Count one delivered update.
    pub fn message_sent(&self) {
        self.tracker.message_sent(self.id);
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.tracker.stop_subscription(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::trigger::EventProvider;

    #[test]
    fn guards_release_on_drop() {
        let tracker = Arc::new(EngineStatisticsTracker::new());
        {
            let conn = tracker.track_connection(TransportKind::WebSocket);
            let sub = conn
                .subscribe(&TriggerSource::event(EventProvider::Redis, "redis", ["updates"]))
                .unwrap();
            sub.message_sent();
            assert_eq!(tracker.snapshot().subscriptions, 1);
        }
        let snapshot = tracker.snapshot();
        assert!(snapshot.is_idle());
        assert_eq!(snapshot.messages_sent, 1);
    }

    #[test]
    fn connection_dropped_before_subscription() {
        let tracker = Arc::new(EngineStatisticsTracker::new());
        let conn = tracker.track_connection(TransportKind::Sse);
        let sub = conn
            .subscribe(&TriggerSource::event(EventProvider::Nats, "nats", ["a"]))
            .unwrap();

        drop(conn);
        assert!(tracker.snapshot().is_idle());
        // late drop must not decrement again
        drop(sub);
        assert!(tracker.snapshot().is_idle());
    }
}
