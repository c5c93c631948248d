//! Configuration loading from disk.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::config::schema::{Config, ExternalSystemConfig, LayerServiceConfig};

/// Environment variable consulted when no explicit config location is given.
pub const CONFIG_PATH_ENV: &str = "DATALAYER_CONFIG_PATH";

/// Location used when neither an explicit path nor the environment names one.
pub const DEFAULT_CONFIG_LOCATION: &str = "./config";

/// Error type for configuration loading, enrichment and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("no config documents found in {}", .0.display())]
    Empty(PathBuf),

    #[error("invalid number in expression: {0}. valid examples: 90s, 1m, 3h")]
    IntervalNumber(String),

    #[error("invalid unit in expression: {0}. valid examples: 90s, 1m, 3h")]
    IntervalUnit(String),

    #[error("invalid listen port {0:?}")]
    InvalidPort(String),

    #[error("required system_config variable {key} not found in config nor LookupEnv({env_var})")]
    MissingRequired { key: String, env_var: String },

    #[error("config key {0} is missing")]
    MissingKey(String),

    #[error("config key {key} expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("config key {key} is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("enrichment failed: {0}")]
    Enrich(String),

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ConfigError>),
}

/// Decoder failure for a single config document.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Read access to process environment variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Document formats understood by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    /// Pick a format from a file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => DocumentFormat::Toml,
            _ => DocumentFormat::Json,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigDocument {
    external_config: Option<ExternalSystemConfig>,
    layer_config: Option<LayerServiceConfig>,
}

impl ConfigDocument {
    fn decode(content: &str, format: DocumentFormat) -> Result<Self, DecodeError> {
        Ok(match format {
            DocumentFormat::Json => serde_json::from_str(content)?,
            DocumentFormat::Toml => toml::from_str(content)?,
        })
    }

    fn fold_into(self, config: &mut Config) {
        if let Some(external) = self.external_config {
            config.external.merge(external);
        }
        if let Some(layer) = self.layer_config {
            config.layer = layer;
        }
    }
}

/// Resolve the config location: explicit path, then environment, then default.
pub fn resolve_location(explicit: Option<&Path>, env: &dyn EnvSource) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    env.var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_LOCATION))
}

/// Decode a single in-memory document. No environment is applied.
pub fn parse_config(content: &str, format: DocumentFormat) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    ConfigDocument::decode(content, format)
        .map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?
        .fold_into(&mut config);
    Ok(config)
}

/// Load configuration using the process environment for overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    load_config_with(path, &ProcessEnv)
}

/// Load configuration from a file or directory and overlay recognised
/// environment variables.
///
/// A directory contributes every `*.json` and `*.toml` file in name order.
/// External maps merge key by key with later files winning; the service block
/// comes from the last file that declares one.
pub fn load_config_with(path: &Path, env: &dyn EnvSource) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    for file in documents(path)? {
        let content = fs::read_to_string(&file).map_err(|source| ConfigError::Io {
            path: file.clone(),
            source,
        })?;
        ConfigDocument::decode(&content, DocumentFormat::from_path(&file))
            .map_err(|source| ConfigError::Parse {
                path: file.clone(),
                source,
            })?
            .fold_into(&mut config);
    }

    apply_environment(&mut config, env);
    config.config_file = path.to_path_buf();

    Ok(config)
}

fn documents(path: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let io_error = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if !fs::metadata(path).map_err(io_error)?.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(path).map_err(io_error)? {
        let file = entry.map_err(io_error)?.path();
        let is_document = matches!(
            file.extension().and_then(|ext| ext.to_str()),
            Some("json") | Some("toml")
        );
        if is_document && file.is_file() {
            files.push(file);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::Empty(path.to_path_buf()));
    }
    Ok(files)
}

/// Overlay the recognised environment variables onto the service block.
///
/// Unset variables leave the loaded value untouched.
pub fn apply_environment(config: &mut Config, env: &dyn EnvSource) {
    let layer = &mut config.layer;

    if let Some(port) = env.var("PORT") {
        layer.port = port;
    }
    if let Some(interval) = env.var("CONFIG_REFRESH_INTERVAL") {
        layer.config_refresh_interval = interval;
    }
    if let Some(name) = env.var("SERVICE_NAME") {
        layer.service_name = name;
    }
    if let Some(enabled) = env.var("STATSD_ENABLED") {
        layer.statsd_enabled = enabled == "true";
    }
    if let Some(address) = env.var("STATSD_AGENT_ADDRESS") {
        layer.statsd_agent_address = address;
    }
    if let Some(level) = env.var("LOG_LEVEL") {
        layer.log_level = level;
    }
    if let Some(format) = env.var("LOG_FORMAT") {
        layer.log_format = format;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "external_config": { "connection": "inmemory" },
        "layer_config": {
            "service_name": "sample",
            "port": "8090",
            "config_refresh_interval": "1m",
            "log_level": "info",
            "log_format": "json"
        }
    }"#;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.json", SAMPLE);

        let config = load_config_with(&path, &env(&[])).unwrap();
        assert_eq!(config.layer.service_name, "sample");
        assert_eq!(config.external.str("connection").unwrap(), "inmemory");
        assert_eq!(config.config_file, path);
    }

    #[test]
    fn test_environment_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "config.json", SAMPLE);
        let env = env(&[
            ("PORT", "8000"),
            ("CONFIG_REFRESH_INTERVAL", "60s"),
            ("SERVICE_NAME", "my_service"),
            ("STATSD_ENABLED", "true"),
            ("STATSD_AGENT_ADDRESS", "localhost:8125"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "text"),
        ]);

        let layer = load_config_with(&path, &env).unwrap().layer;
        assert_eq!(layer.port, "8000");
        assert_eq!(layer.config_refresh_interval, "60s");
        assert_eq!(layer.service_name, "my_service");
        assert!(layer.statsd_enabled);
        assert_eq!(layer.statsd_agent_address, "localhost:8125");
        assert_eq!(layer.log_level, "debug");
        assert_eq!(layer.log_format, "text");
    }

    #[test]
    fn test_statsd_enabled_requires_literal_true() {
        let mut config = parse_config(r#"{ "layer_config": { "statsd_enabled": true } }"#, DocumentFormat::Json).unwrap();
        apply_environment(&mut config, &env(&[("STATSD_ENABLED", "TRUE")]));
        assert!(!config.layer.statsd_enabled);
    }

    #[test]
    fn test_port_as_number() {
        let numeric = parse_config(r#"{ "layer_config": { "port": 8000 } }"#, DocumentFormat::Json).unwrap();
        let string = parse_config(r#"{ "layer_config": { "port": "8000" } }"#, DocumentFormat::Json).unwrap();
        assert_eq!(numeric.layer.port, "8000");
        assert_eq!(numeric, string);
    }

    #[test]
    fn test_toml_document() {
        let config = parse_config(
            "[layer_config]\nservice_name = \"sample\"\nport = 8000\n\n[external_config]\nconnection = \"inmemory\"\n",
            DocumentFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.layer.port, "8000");
        assert_eq!(config.external.str("connection").unwrap(), "inmemory");
    }

    #[test]
    fn test_directory_merges_documents_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_base.json", SAMPLE);
        write(
            dir.path(),
            "b_local.json",
            r#"{ "external_config": { "connection": "postgres", "db_name": "things" } }"#,
        );
        write(dir.path(), "notes.txt", "not a config");

        let config = load_config_with(dir.path(), &env(&[])).unwrap();
        assert_eq!(config.layer.service_name, "sample");
        assert_eq!(config.external.str("connection").unwrap(), "postgres");
        assert_eq!(config.external.str("db_name").unwrap(), "things");
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_with(dir.path(), &env(&[])),
            Err(ConfigError::Empty(_))
        ));
    }

    #[test]
    fn test_missing_file_and_bad_document() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_with(&dir.path().join("absent.json"), &env(&[])),
            Err(ConfigError::Io { .. })
        ));

        let path = write(dir.path(), "broken.json", "{ not json");
        assert!(matches!(
            load_config_with(&path, &env(&[])),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_resolve_location_priority() {
        let explicit = PathBuf::from("/srv/explicit.json");
        let from_env = env(&[(CONFIG_PATH_ENV, "/srv/env")]);

        assert_eq!(resolve_location(Some(&explicit), &from_env), explicit);
        assert_eq!(resolve_location(None, &from_env), PathBuf::from("/srv/env"));
        assert_eq!(
            resolve_location(None, &env(&[])),
            PathBuf::from(DEFAULT_CONFIG_LOCATION)
        );
    }
}
