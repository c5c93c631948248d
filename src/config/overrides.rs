//! Application-declared environment overrides for the external config map.
//!
//! An [`EnvOverride`] names an environment variable that, when set, replaces a
//! key in `external_config`. The file value is the fallback; a required key
//! fails enrichment only when neither source provides it.

use std::sync::Arc;

use crate::config::loader::{ConfigError, EnvSource, ProcessEnv};
use crate::config::schema::Config;

/// Post-load hook applied to every snapshot, at startup and on each reload.
///
/// Must be idempotent: it runs again on every refresh tick against a freshly
/// loaded snapshot.
pub type EnrichConfig = Arc<dyn Fn(&mut Config) -> Result<(), ConfigError> + Send + Sync>;

/// One environment variable to config key mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverride {
    pub env_var: String,
    pub conf_key: Option<String>,
    pub required: bool,
}

impl EnvOverride {
    /// An override that is skipped when the variable is unset.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            env_var: name.into(),
            conf_key: None,
            required: false,
        }
    }

    /// An override that must resolve from the environment or the file.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(name)
        }
    }

    /// Write to `key` instead of the lower-cased variable name.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.conf_key = Some(key.into());
        self
    }

    pub fn env_var_name(&self) -> String {
        self.env_var.to_uppercase()
    }

    pub fn config_key(&self) -> String {
        self.conf_key
            .clone()
            .unwrap_or_else(|| self.env_var.to_lowercase())
    }

    fn apply(&self, config: &mut Config, env: &dyn EnvSource) -> Result<(), ConfigError> {
        let env_var = self.env_var_name();
        let key = self.config_key();

        match env.var(&env_var) {
            Some(value) => {
                config.external.insert(key, value);
            }
            None if self.required && !config.external.contains_key(&key) => {
                return Err(ConfigError::MissingRequired { key, env_var });
            }
            None => {}
        }
        Ok(())
    }
}

/// Build an enrichment function reading the process environment.
pub fn build_env_overrides(overrides: Vec<EnvOverride>) -> EnrichConfig {
    build_env_overrides_from(Arc::new(ProcessEnv), overrides)
}

/// Build an enrichment function reading from the given environment.
///
/// Overrides apply in order; the first required-and-missing key aborts.
pub fn build_env_overrides_from(
    env: Arc<dyn EnvSource>,
    overrides: Vec<EnvOverride>,
) -> EnrichConfig {
    Arc::new(move |config: &mut Config| {
        overrides
            .iter()
            .try_for_each(|entry| entry.apply(config, env.as_ref()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> Arc<dyn EnvSource> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(map)
    }

    fn with_file_value(key: &str, value: &str) -> Config {
        let mut config = Config::default();
        config.external.insert(key, value);
        config
    }

    #[test]
    fn test_environment_wins_over_file() {
        let enrich = build_env_overrides_from(
            env(&[("DB_USER", "envuser")]),
            vec![EnvOverride::required("db_user")],
        );
        let mut config = with_file_value("db_user", "fileuser");
        config.enrich(&enrich).unwrap();
        assert_eq!(config.external.str("db_user").unwrap(), "envuser");
    }

    #[test]
    fn test_file_value_retained_without_environment() {
        let enrich = build_env_overrides_from(env(&[]), vec![EnvOverride::required("db_user")]);
        let mut config = with_file_value("db_user", "fileuser");
        config.enrich(&enrich).unwrap();
        assert_eq!(config.external.str("db_user").unwrap(), "fileuser");
    }

    #[test]
    fn test_required_missing_everywhere_fails() {
        let enrich = build_env_overrides_from(env(&[]), vec![EnvOverride::required("db_pwd")]);
        let mut config = Config::default();
        let err = config.enrich(&enrich).unwrap_err();
        assert!(matches!(
            &err,
            ConfigError::MissingRequired { key, env_var } if key == "db_pwd" && env_var == "DB_PWD"
        ));
        assert!(err.to_string().contains("db_pwd"));
        assert!(err.to_string().contains("DB_PWD"));
    }

    #[test]
    fn test_optional_missing_is_skipped() {
        let enrich = build_env_overrides_from(env(&[]), vec![EnvOverride::optional("db_timeout")]);
        let mut config = Config::default();
        config.enrich(&enrich).unwrap();
        assert!(!config.external.contains_key("db_timeout"));
    }

    #[test]
    fn test_custom_key_and_raw_string_value() {
        let enrich = build_env_overrides_from(
            env(&[("DB_USER", "alice"), ("DB_TIMEOUT", "30")]),
            vec![
                EnvOverride::required("db_user").key("dbUser"),
                EnvOverride::optional("db_timeout"),
            ],
        );
        let mut config = Config::default();
        config.enrich(&enrich).unwrap();
        assert_eq!(config.external.str("dbUser").unwrap(), "alice");
        assert_eq!(config.external.str("db_timeout").unwrap(), "30");
        assert!(!config.external.contains_key("db_user"));
    }

    #[test]
    fn test_first_failure_aborts_remaining() {
        let enrich = build_env_overrides_from(
            env(&[("LATER", "value")]),
            vec![EnvOverride::required("missing"), EnvOverride::optional("later")],
        );
        let mut config = Config::default();
        assert!(config.enrich(&enrich).is_err());
        assert!(!config.external.contains_key("later"));
    }
}
