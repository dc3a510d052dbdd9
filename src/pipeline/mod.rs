//! Operation preparation pipeline.
//!
//! # Data Flow
//! ```text
//! OperationRequest
//!     → processor.rs (cache lookups in fixed order)
//!         → engine.rs (GraphqlEngine computes missing artifacts)
//!     → PreparedOperation (artifacts + cache hit flags)
//! ```
//!
//! # Design Decisions
//! - The engine is a trait object; the router never parses GraphQL itself
//! - One pipeline per namespace, sharing the engine
//! - `passthrough.rs` provides a lexical engine for the binary and tests

pub mod engine;
pub mod passthrough;
pub mod processor;

pub use engine::{
    ClientInfo, EngineError, ExecutionPlan, GraphqlEngine, NormalizedOperation, OperationRequest,
    OperationType, PersistedQuery, ValidationOutcome,
};
pub use passthrough::PassthroughEngine;
pub use processor::{CacheHits, OperationPipeline, PipelineError, PreparedOperation};
