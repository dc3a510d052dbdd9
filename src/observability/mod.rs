//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → telemetry emitter → metrics.rs (Prometheus scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metric rendering lives in `telemetry`; this module only wires process-wide sinks

pub mod logging;
pub mod metrics;
