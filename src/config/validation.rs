//! Configuration validation.
//!
//! # Responsibilities
//! - Parse the refresh interval expression (`90s`, `1m`, `3h`)
//! - Check the listen port is a valid TCP port
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Runs at startup so a bad snapshot never gets wired into a running service

use std::time::Duration;

use crate::config::loader::ConfigError;
use crate::config::schema::Config;

/// Refresh period used when the config does not set one.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Parse a `<integer><unit>` duration where unit is `s`, `m` or `h`.
///
/// An empty expression yields [`DEFAULT_REFRESH_INTERVAL`].
pub fn parse_refresh_interval(expr: &str) -> Result<Duration, ConfigError> {
    if expr.is_empty() {
        return Ok(DEFAULT_REFRESH_INTERVAL);
    }

    let Some((split, unit)) = expr.char_indices().last() else {
        return Ok(DEFAULT_REFRESH_INTERVAL);
    };
    let amount: u64 = expr[..split]
        .parse()
        .map_err(|_| ConfigError::IntervalNumber(expr.to_string()))?;
    let per_unit = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        _ => return Err(ConfigError::IntervalUnit(expr.to_string())),
    };
    if amount == 0 {
        return Err(ConfigError::IntervalNumber(expr.to_string()));
    }

    Ok(Duration::from_secs(amount.saturating_mul(per_unit)))
}

/// Parse the configured listen port. `0` asks the OS for a free port.
pub fn listen_port(config: &Config) -> Result<u16, ConfigError> {
    let port = config.layer.port.trim();
    port.parse()
        .map_err(|_| ConfigError::InvalidPort(config.layer.port.clone()))
}

/// Validate the parts of a snapshot the harness depends on.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if let Err(e) = parse_refresh_interval(&config.layer.config_refresh_interval) {
        errors.push(e);
    }
    if let Err(e) = listen_port(config) {
        errors.push(e);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation(errors))
    }
}
