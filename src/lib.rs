//! GraphQL federation router: operation caches, engine statistics and telemetry.

pub mod admin;
pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod statistics;
pub mod telemetry;

pub use config::schema::RouterConfig;
pub use lifecycle::{RouterInstance, Shutdown};
