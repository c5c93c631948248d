//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Enrich → Validate → Logger/Metrics → Service
//!     → ConfigUpdater → HTTP listener
//!
//! Shutdown (shutdown.rs):
//!     stop() or signal → every stoppable stopped concurrently
//!     → errors aggregated → exit code
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - A failed startup stops whatever already started
//! - Shutdown has timeout: one shared deadline for all components

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{stop_all, BoxError, Shutdown, ShutdownError, StopError, Stoppable};
pub use signals::{wait_for_termination, Termination};
pub use startup::{
    RunnerOptions, ServiceRunner, StartError, DEFAULT_STOP_TIMEOUT, EXIT_CLEAN, EXIT_START_FAILURE,
    EXIT_STOP_FAILURE,
};
