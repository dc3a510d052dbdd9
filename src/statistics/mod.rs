//! Engine statistics subsystem.
//!
//! # Data Flow
//! ```text
//! Client connects (WebSocket / SSE)        Event subgraph (Kafka / NATS / Redis)
//!     → guard.rs ConnectionGuard               → TriggerSource::event
//!     → guard.rs SubscriptionGuard  ←──────────┘
//!         → tracker.rs (connections, subscriptions, triggers refcounted by TriggerKey)
//!     → session.rs forwards updates, counts messages sent
//!
//! Exporter:
//!     tracker.snapshot() → telemetry emitter (router.engine.*)
//! ```
//!
//! # Design Decisions
//! - One tracker per router instance, injected rather than global
//! - Guards release on drop, so aborted tasks cannot leak gauges
//! - Trigger deduplication ignores the client transport

pub mod guard;
pub mod session;
pub mod tracker;
pub mod trigger;

pub use guard::{ConnectionGuard, SubscriptionGuard};
pub use session::{run_subscription, SessionEnd, SessionError, SessionSummary};
pub use tracker::{
    ConnectionId, EngineSnapshot, EngineStatisticsTracker, StatisticsError, SubscriptionId,
};
pub use trigger::{EventProvider, TransportKind, TriggerKey, TriggerSource};
