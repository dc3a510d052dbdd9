//! Telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! Request path:
//!     RequestContext / SubgraphContext (context.rs)
//!         → attributes.rs (well-known + custom attributes, expr/ for expressions)
//!         → request_metrics.rs (router.http.requests*)
//!
//! Collection cycle (reader.rs, every export_interval_secs, reconfigured on reload):
//!     emitter.rs collect()
//!         ← CacheStatsRecorder snapshot    (router.graphql.cache.*)
//!         ← EngineStatisticsTracker        (router.engine.*)
//!         ← RequestMetricStore             (router.http.requests*)
//!     → filter.rs (metric and attribute exclusions)
//!     → exporter.rs (Prometheus facade, in-memory, log-only sink)
//!         wrapped by debug_export.rs when enabled
//! ```
//!
//! # Design Decisions
//! - All metrics are cumulative; the exporter reads, never resets
//! - Attribute expressions compile at config load, never at request time
//! - Exclusions run once per cycle on the rendered model, not on the hot path

pub mod attributes;
pub mod context;
pub mod debug_export;
pub mod emitter;
pub mod exporter;
pub mod expr;
pub mod filter;
pub mod model;
pub mod reader;
pub mod request_metrics;

pub use attributes::{CustomAttributeSet, RouterIdentity};
pub use context::{RequestContext, SubgraphContext};
pub use debug_export::DebugExporter;
pub use emitter::{EmitterSettings, TelemetryEmitter, TelemetryError};
pub use exporter::{ExportError, InMemoryExporter, LogSink, MetricExporter, PrometheusExporter};
pub use filter::{FilterError, MetricFilter};
pub use model::{AttributeValue, Metric, MetricKind, ResourceMetrics};
pub use reader::{exporters_for, FlushReport, PeriodicReader};
pub use request_metrics::RequestMetricStore;
