//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → compile attributes → create namespaces → RouterInstance
//!
//! Reload (reload.rs):
//!     ConfigWatcher / SIGHUP → apply_config → swap pipelines → reconfigure export
//!         → evict old namespaces and their request series
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → reader flushes, tasks exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then caches, then background tasks
//! - A rejected reload never touches the running instance

pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reload::{watch_config, ReloadOutcome};
pub use shutdown::Shutdown;
pub use signals::{next_signal, Signal};
pub use startup::{RouterInstance, StartupError};
