//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file or directory (JSON/TOML)
//!     → loader.rs (parse, apply environment)
//!     → overrides.rs (application enrichment)
//!     → validation.rs (semantic checks)
//!     → Config (immutable, shared via Arc)
//!
//! Every refresh interval:
//!     watcher.rs reloads the same source
//!     → same pipeline as above
//!     → compare with baseline
//!     → listeners notified in order
//!     → atomic swap of the baseline
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod overrides;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{
    load_config, load_config_with, resolve_location, ConfigError, EnvSource, ProcessEnv,
    CONFIG_PATH_ENV, DEFAULT_CONFIG_LOCATION,
};
pub use overrides::{build_env_overrides, build_env_overrides_from, EnrichConfig, EnvOverride};
pub use schema::{Config, ExternalSystemConfig, LayerServiceConfig};
pub use validation::{parse_refresh_interval, validate_config};
pub use watcher::{ConfigUpdater, Reloader, TickOutcome};
