//! Engine-wide configuration.
//!
//! An [`EngineConfig`] is built once (file, then `EMBER_*` environment
//! overrides) and handed to the engine by value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub environments: HashMap<String, EnvironmentConfig>,
}

/// Settings applied to every scenario.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Seeded into the global variable scope.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

/// Transport and retry defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub follow_redirects: bool,
    pub verify_ssl: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            max_retries: 0,
            retry_delay_ms: 1000,
            follow_redirects: true,
            verify_ssl: true,
        }
    }
}

/// Named environment override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl EngineConfig {
    /// Load from a YAML file, or start from defaults when no path is
    /// given. Environment overrides are applied either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                let content = fs::read_to_string(path).context(format!(
                    "Failed to read config file: {}",
                    path.display()
                ))?;
                Self::from_yaml(&content).context(format!(
                    "Failed to parse config file: {}",
                    path.display()
                ))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Apply `EMBER_BASE_URL` and `EMBER_TIMEOUT` (seconds).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("EMBER_BASE_URL").filter(|v| !v.is_empty()) {
            debug!(%base_url, "base URL overridden from environment");
            self.global.base_url = Some(base_url);
        }
        if let Some(timeout) = lookup("EMBER_TIMEOUT").and_then(|v| v.parse::<u64>().ok()) {
            if timeout > 0 {
                debug!(timeout, "timeout overridden from environment");
                self.defaults.http_timeout_secs = timeout;
            }
        }
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.get(name)
    }

    /// A copy with the named environment's base URL, headers and variables
    /// merged over the globals. Unknown names return an unchanged copy.
    pub fn merge_environment(&self, name: &str) -> Self {
        let mut merged = self.clone();
        if let Some(env) = self.environment(name) {
            if let Some(base_url) = env.base_url.as_ref().filter(|url| !url.is_empty()) {
                merged.global.base_url = Some(base_url.clone());
            }
            merged
                .global
                .headers
                .extend(env.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
                .global
                .variables
                .extend(env.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}
