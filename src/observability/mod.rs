//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Runner, updater, ingress and the transformation service produce:
//!     → logging.rs (structured events through a per-service Logger)
//!     → metrics.rs (counters, timings, gauges through the Metrics trait)
//!
//! Consumers:
//!     → stdout (JSON lines or text)
//!     → StatsD agent (UDP push)
//!     → ServiceMetrics::render (in-process Prometheus text)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows from the ingress into every request log line
//! - Nothing here installs process-wide state

pub mod logging;
pub mod metrics;

pub use self::logging::Logger;
pub use self::metrics::{Metrics, MetricsError, ServiceMetrics, Tag};
