//! Live engine statistics.
//!
//! # Responsibilities
//! - Count open connections, active subscriptions and active triggers
//! - Count delivered messages (monotonic)
//! - Cascade connection close to the connection's subscriptions
//!
//! # Design Decisions
//! - Gauges are independent atomics, read without locks by the exporter
//! - Records live in sharded maps; a gauge moves only when its record is
//!   actually inserted or removed, which makes every release idempotent
//! - Lock order is connections → subscriptions → triggers, and no shard
//!   guard of a later map is held while a guard of an earlier map is taken

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::statistics::trigger::{TransportKind, TriggerKey, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StatisticsError {
    #[error("connection {0} is not open")]
    UnknownConnection(ConnectionId),
}

#[derive(Debug)]
struct ConnectionRecord {
    transport: TransportKind,
    subscriptions: HashSet<SubscriptionId>,
}

#[derive(Debug, Clone, Copy)]
struct SubscriptionRecord {
    connection: ConnectionId,
    trigger: TriggerKey,
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    pub connections: i64,
    pub subscriptions: i64,
    pub triggers: i64,
    pub messages_sent: u64,
}

impl EngineSnapshot {
    /// Whether every gauge is back at zero.
    pub fn is_idle(&self) -> bool {
        self.connections == 0 && self.subscriptions == 0 && self.triggers == 0
    }
}

/// Statistics of one router instance.
#[derive(Debug, Default)]
pub struct EngineStatisticsTracker {
    connections: DashMap<ConnectionId, ConnectionRecord>,
    subscriptions: DashMap<SubscriptionId, SubscriptionRecord>,
    /// trigger → number of subscriptions using it
    triggers: DashMap<TriggerKey, usize>,

    connection_count: AtomicI64,
    subscription_count: AtomicI64,
    trigger_count: AtomicI64,
    messages_sent: AtomicU64,

    next_id: AtomicU64,
}

impl EngineStatisticsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a new connection.
    pub fn open_connection(&self, transport: TransportKind) -> ConnectionId {
        let id = ConnectionId(self.next_id());
        self.connections.insert(
            id,
            ConnectionRecord {
                transport,
                subscriptions: HashSet::new(),
            },
        );
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = %id, transport = %transport, "Connection opened");
        id
    }

    /// Close a connection and every subscription it still owns.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close_connection(&self, id: ConnectionId) -> bool {
        let Some((_, record)) = self.connections.remove(&id) else {
            return false;
        };
        self.connection_count.fetch_sub(1, Ordering::Relaxed);

        let mut cascaded = 0usize;
        for subscription in record.subscriptions {
            if self.remove_subscription(subscription) {
                cascaded += 1;
            }
        }
        tracing::debug!(
            connection_id = %id,
            transport = %record.transport,
            subscriptions_closed = cascaded,
            "Connection closed"
        );
        true
    }

    /// Start a subscription on an open connection.
    pub fn start_subscription(
        &self,
        connection: ConnectionId,
        source: &TriggerSource,
    ) -> Result<SubscriptionId, StatisticsError> {
        let trigger = source.key();
        // holding the connection shard keeps a concurrent close from missing this subscription
        let mut record = self
            .connections
            .get_mut(&connection)
            .ok_or(StatisticsError::UnknownConnection(connection))?;

        let id = SubscriptionId(self.next_id());
        self.subscriptions.insert(id, SubscriptionRecord { connection, trigger });
        self.subscription_count.fetch_add(1, Ordering::Relaxed);
        self.acquire_trigger(trigger);
        record.subscriptions.insert(id);
        drop(record);

        tracing::debug!(
            subscription_id = %id,
            connection_id = %connection,
            trigger = %trigger,
            "Subscription started"
        );
        Ok(id)
    }

    /// Stop a subscription. Returns `false` if it was already stopped.
    pub fn stop_subscription(&self, id: SubscriptionId) -> bool {
        let Some(connection) = self.subscriptions.get(&id).map(|r| r.connection) else {
            return false;
        };
        if !self.remove_subscription(id) {
            return false;
        }
        if let Some(mut record) = self.connections.get_mut(&connection) {
            record.subscriptions.remove(&id);
        }
        tracing::debug!(subscription_id = %id, connection_id = %connection, "Subscription stopped");
        true
    }

    /// Count one update delivered to a subscriber.
    pub fn message_sent(&self, id: SubscriptionId) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        if !self.subscriptions.contains_key(&id) {
            tracing::trace!(
                subscription_id = %id,
                "Message sent for a subscription that is no longer tracked"
            );
        }
    }

    /// Current values of all gauges and the message counter.
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connections: self.connection_count.load(Ordering::Relaxed),
            subscriptions: self.subscription_count.load(Ordering::Relaxed),
            triggers: self.trigger_count.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }

    /// Transport of an open connection.
    pub fn transport(&self, id: ConnectionId) -> Option<TransportKind> {
        self.connections.get(&id).map(|r| r.transport)
    }

    /// Subscriptions sharing a trigger.
    pub fn trigger_subscribers(&self, key: TriggerKey) -> usize {
        self.triggers.get(&key).map(|r| *r).unwrap_or(0)
    }

    fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let Some((_, record)) = self.subscriptions.remove(&id) else {
            return false;
        };
        self.subscription_count.fetch_sub(1, Ordering::Relaxed);
        self.release_trigger(record.trigger);
        true
    }

    fn acquire_trigger(&self, key: TriggerKey) {
        let mut refs = self.triggers.entry(key).or_insert(0);
        *refs += 1;
        if *refs == 1 {
            self.trigger_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(trigger = %key, "Trigger started");
        }
    }

    fn release_trigger(&self, key: TriggerKey) {
        if let Entry::Occupied(mut entry) = self.triggers.entry(key) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
                self.trigger_count.fetch_sub(1, Ordering::Relaxed);
                tracing::debug!(trigger = %key, "Trigger stopped");
            }
        }
    }
}
