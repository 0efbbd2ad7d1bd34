//! Application configuration.
//!
//! Layered: built-in defaults, then an optional `audit-anchor.toml`, then
//! `AUDIT_ANCHOR_*` environment variables (`__` separates sections, e.g.
//! `AUDIT_ANCHOR_ANCHOR__WINDOW_SECS=3600`).

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AnchorError, Result};

pub const ENV_PREFIX: &str = "AUDIT_ANCHOR";
const CONFIG_FILE: &str = "audit-anchor";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub anchor: SchedulerConfig,
    pub chain: ChainConfig,
}

/// Anchor sweep tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Time between sweeps.
    pub interval_secs: u64,
    /// Length of the epoch-aligned window each sweep covers.
    pub window_secs: u64,
    /// Cap on distinct actors processed per sweep.
    pub max_actors: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Anchoring gateway base URL; unset disables anchoring.
    #[serde(default)]
    pub gateway_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-request timeout for gateway calls.
    pub timeout_secs: u64,
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("gateway_url", &self.gateway_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 86_400,
            window_secs: 86_400,
            max_actors: 500,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.window_secs == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.window_secs must be greater than zero".to_string(),
            ));
        }
        if i64::try_from(self.window_secs).is_err() {
            return Err(AnchorError::ConfigError(format!(
                "anchor.window_secs ({}) is too large",
                self.window_secs
            )));
        }
        if self.max_actors == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.max_actors must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load from the config file and process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load with an explicit environment source.
    pub fn load_with(environment: Environment) -> Result<Self> {
        let defaults = SchedulerConfig::default();
        let settings = Config::builder()
            .set_default("database_url", "sqlite://audit-anchor.db")
            .and_then(|b| b.set_default("anchor.interval_secs", defaults.interval_secs))
            .and_then(|b| b.set_default("anchor.window_secs", defaults.window_secs))
            .and_then(|b| b.set_default("anchor.max_actors", defaults.max_actors))
            .and_then(|b| b.set_default("chain.timeout_secs", 30_u64))
            .map_err(|e| AnchorError::ConfigError(e.to_string()))?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AnchorError::ConfigError(format!("Failed to load configuration: {}", e)))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| AnchorError::ConfigError(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(AnchorError::ConfigError("database_url is required".to_string()));
        }
        self.anchor.validate()?;
        if self.chain.timeout_secs == 0 {
            return Err(AnchorError::ConfigError(
                "chain.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::load_with(env(&[])).unwrap();
        assert_eq!(config.anchor, SchedulerConfig::default());
        assert_eq!(config.anchor.interval_secs, 86_400);
        assert_eq!(config.anchor.max_actors, 500);
        assert_eq!(config.chain.timeout_secs, 30);
        assert!(config.chain.gateway_url.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::load_with(env(&[
            ("AUDIT_ANCHOR_DATABASE_URL", "sqlite://other.db"),
            ("AUDIT_ANCHOR_ANCHOR__WINDOW_SECS", "3600"),
            ("AUDIT_ANCHOR_ANCHOR__MAX_ACTORS", "25"),
            ("AUDIT_ANCHOR_CHAIN__GATEWAY_URL", "https://gateway.example"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite://other.db");
        assert_eq!(config.anchor.window_secs, 3600);
        assert_eq!(config.anchor.max_actors, 25);
        assert_eq!(config.chain.gateway_url.as_deref(), Some("https://gateway.example"));
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in [
            "AUDIT_ANCHOR_ANCHOR__INTERVAL_SECS",
            "AUDIT_ANCHOR_ANCHOR__WINDOW_SECS",
            "AUDIT_ANCHOR_ANCHOR__MAX_ACTORS",
            "AUDIT_ANCHOR_CHAIN__TIMEOUT_SECS",
        ] {
            let result = AppConfig::load_with(env(&[(key, "0")]));
            assert!(
                matches!(result, Err(AnchorError::ConfigError(_))),
                "{} = 0 should be rejected",
                key
            );
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let chain = ChainConfig {
            gateway_url: None,
            api_token: Some("super-secret".to_string()),
            timeout_secs: 30,
        };
        assert!(!format!("{:?}", chain).contains("super-secret"));
    }
}
