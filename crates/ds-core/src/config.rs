//! Plugin configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::Capabilities;

/// Error type for configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime options. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    /// Variant variable holding the DOM change payload
    pub variable_key: String,
    /// Variant variable holding code injections
    pub injection_key: String,
    /// Defer every change whose target is missing
    pub spa_mode: bool,
    pub debug: bool,
    /// Mutation coalescing window
    pub debounce_ms: u64,
    /// Minimum intersection ratio passed to the platform observer
    pub visibility_threshold: f64,
    pub allow_scripts: bool,
    pub allow_injection: bool,
    /// Experiment name to forced variant index
    pub overrides: BTreeMap<String, usize>,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            variable_key: "__dom_changes".to_string(),
            injection_key: "__inject_html".to_string(),
            spa_mode: false,
            debug: false,
            debounce_ms: 50,
            visibility_threshold: 0.0,
            allow_scripts: true,
            allow_injection: true,
            overrides: BTreeMap::new(),
        }
    }
}

impl PluginConfig {
    /// Parse and validate a JSON config. An empty string yields the defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.variable_key.is_empty() {
            return Err(ConfigError::Invalid("variableKey must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.visibility_threshold) {
            return Err(ConfigError::Invalid(format!(
                "visibilityThreshold must be within 0..=1, got {}",
                self.visibility_threshold
            )));
        }
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::empty();
        if self.allow_scripts {
            caps |= Capabilities::SCRIPTS;
        }
        if self.allow_injection {
            caps |= Capabilities::INJECTION;
        }
        caps
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = PluginConfig::from_json("{}").expect("config");
        assert_eq!(config, PluginConfig::default());
        assert_eq!(config.capabilities(), Capabilities::ALL);
        assert_eq!(config.debounce(), Duration::from_millis(50));
        assert_eq!(PluginConfig::from_json("").expect("config"), PluginConfig::default());
    }

    #[test]
    fn camel_case_fields() {
        let config = PluginConfig::from_json(
            r#"{"variableKey":"dom","spaMode":true,"debounceMs":10,"allowScripts":false,"overrides":{"hero":1}}"#,
        )
        .expect("config");
        assert_eq!(config.variable_key, "dom");
        assert!(config.spa_mode);
        assert_eq!(config.debounce_ms, 10);
        assert_eq!(config.capabilities(), Capabilities::INJECTION);
        assert_eq!(config.overrides.get("hero"), Some(&1));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(PluginConfig::from_json("{"), Err(ConfigError::Json(_))));
        assert!(matches!(
            PluginConfig::from_json(r#"{"visibilityThreshold": 2}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PluginConfig::from_json(r#"{"variableKey": ""}"#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
