//! Runtime harness for entity transformation services.
//!
//! The harness loads configuration, keeps it fresh with a polling updater,
//! runs a user-supplied [`TransformService`] behind an HTTP ingress, and stops
//! everything together on request or on a termination signal.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod transform;

pub use config::{Config, EnrichConfig, EnvOverride};
pub use http::HttpServer;
pub use lifecycle::{RunnerOptions, ServiceRunner, Shutdown, Stoppable};
pub use observability::{Logger, Metrics};
pub use transform::{EntityCollection, TransformError, TransformService};
