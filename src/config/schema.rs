//! Configuration schema definitions.
//!
//! A loaded document has two top-level blocks: `external_config`, an open map
//! of settings owned by the embedding application, and `layer_config`, the
//! fixed-shape settings the harness itself consumes.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::loader::ConfigError;
use crate::config::overrides::EnrichConfig;

/// One loaded configuration snapshot.
///
/// Snapshots are compared structurally: two snapshots are equal only when both
/// blocks and the recorded source path are equal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
    /// Location the snapshot was loaded from. Reloads always read this path.
    pub config_file: PathBuf,

    /// Settings for downstream systems, keyed by application-defined names.
    pub external: ExternalSystemConfig,

    /// Settings consumed by the harness.
    pub layer: LayerServiceConfig,
}

impl Config {
    /// Run an enrichment function against this snapshot.
    pub fn enrich(&mut self, enrich: &EnrichConfig) -> Result<(), ConfigError> {
        enrich(self)
    }
}

/// Settings consumed by the harness itself.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LayerServiceConfig {
    /// Free-form settings carried alongside the service block.
    pub custom: Map<String, Value>,

    /// Service name used for log context and metric namespacing.
    pub service_name: String,

    /// Listen port, kept as the literal digits from the document.
    #[serde(deserialize_with = "deserialize_port")]
    pub port: String,

    /// Reload period expression such as `90s`, `1m` or `3h`.
    pub config_refresh_interval: String,

    /// One of `debug`, `info`, `warn`, `error`.
    pub log_level: String,

    /// `text` for human output, anything else for JSON.
    pub log_format: String,

    /// StatsD agent to push metrics to, `host:port`.
    pub statsd_agent_address: String,

    /// Enable metrics.
    pub statsd_enabled: bool,
}

/// Open-ended settings map with typed accessors.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExternalSystemConfig(Map<String, Value>);

impl ExternalSystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge another map into this one. Keys from `other` win.
    pub fn merge(&mut self, other: ExternalSystemConfig) {
        self.0.extend(other.0);
    }

    /// Look up a key that must be present.
    pub fn require(&self, key: &str) -> Result<&Value, ConfigError> {
        self.0
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn str(&self, key: &str) -> Result<&str, ConfigError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "string", value))
    }

    pub fn bool(&self, key: &str) -> Result<bool, ConfigError> {
        let value = self.require(key)?;
        value.as_bool().ok_or_else(|| mismatch(key, "bool", value))
    }

    pub fn i64(&self, key: &str) -> Result<i64, ConfigError> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| mismatch(key, "integer", value))
    }

    pub fn f64(&self, key: &str) -> Result<f64, ConfigError> {
        let value = self.require(key)?;
        value.as_f64().ok_or_else(|| mismatch(key, "number", value))
    }

    pub fn map(&self, key: &str) -> Result<&Map<String, Value>, ConfigError> {
        let value = self.require(key)?;
        value.as_object().ok_or_else(|| mismatch(key, "map", value))
    }

    pub fn list(&self, key: &str) -> Result<&[Value], ConfigError> {
        let value = self.require(key)?;
        value
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(|| mismatch(key, "list", value))
    }

    /// Parse a value that may be stored as a string or as a JSON scalar.
    ///
    /// Environment overrides always write strings, so this is the accessor to
    /// use for settings that can come from either the file or the environment.
    pub fn parse<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let value = self.require(key)?;
        let raw = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => return Err(mismatch(key, "scalar", other)),
        };
        raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FromIterator<(String, Value)> for ExternalSystemConfig {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Map<String, Value>> for ExternalSystemConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> ConfigError {
    ConfigError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: kind_name(found),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

/// Accept the port as a number or a string and keep its literal digits.
fn deserialize_port<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct PortVisitor;

    impl Visitor<'_> for PortVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a port as a number or a string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        // `8e3` is a float to the decoder; its digits are not a port.
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Err(E::invalid_type(de::Unexpected::Float(v), &self))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_unit<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(PortVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> Config {
        let mut config = Config {
            config_file: PathBuf::from("/etc/transform/config.json"),
            ..Config::default()
        };
        config.external.insert("connection", "inmemory");
        config.external.insert("batch_size", 50);
        config.layer.service_name = "sample".into();
        config.layer.port = "8090".into();
        config
    }

    #[test]
    fn test_structurally_equal_snapshots() {
        assert_eq!(snapshot(), snapshot());
    }

    #[test]
    fn test_single_field_difference_breaks_equality() {
        let base = snapshot();

        let mut other = snapshot();
        other.external.insert("connection", "postgres");
        assert_ne!(base, other);

        let mut other = snapshot();
        other.external.insert("extra", true);
        assert_ne!(base, other);

        let mut other = snapshot();
        other.layer.log_level = "debug".into();
        assert_ne!(base, other);

        let mut other = snapshot();
        other.config_file = PathBuf::from("/etc/transform/other.json");
        assert_ne!(base, other);
    }

    #[test]
    fn test_port_number_and_string_decode_identically() {
        let numeric: LayerServiceConfig = serde_json::from_value(json!({ "port": 8000 })).unwrap();
        let string: LayerServiceConfig = serde_json::from_value(json!({ "port": "8000" })).unwrap();
        assert_eq!(numeric.port, "8000");
        assert_eq!(numeric, string);
    }

    #[test]
    fn test_fractional_or_exponent_port_is_rejected() {
        for doc in [r#"{"port": 8e3}"#, r#"{"port": 8000.0}"#, r#"{"port": 80.5}"#] {
            let err = serde_json::from_str::<LayerServiceConfig>(doc).unwrap_err();
            assert!(err.to_string().contains("floating point"), "{doc}: {err}");
        }
        let err = toml::from_str::<LayerServiceConfig>("port = 8000.0").unwrap_err();
        assert!(err.to_string().contains("a port as a number or a string"));
    }

    #[test]
    fn test_typed_accessors() {
        let config = snapshot();
        assert_eq!(config.external.str("connection").unwrap(), "inmemory");
        assert_eq!(config.external.i64("batch_size").unwrap(), 50);
        assert_eq!(config.external.parse::<u32>("batch_size").unwrap(), 50);

        assert!(matches!(
            config.external.bool("connection"),
            Err(ConfigError::TypeMismatch { expected: "bool", found: "string", .. })
        ));
        assert!(matches!(
            config.external.str("missing"),
            Err(ConfigError::MissingKey(key)) if key == "missing"
        ));
        assert!(matches!(
            config.external.parse::<u32>("connection"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_merge_prefers_incoming_keys() {
        let mut base = snapshot().external;
        let incoming: ExternalSystemConfig =
            [("connection".to_string(), json!("postgres"))].into_iter().collect();
        base.merge(incoming);
        assert_eq!(base.str("connection").unwrap(), "postgres");
        assert_eq!(base.len(), 2);
    }
}
