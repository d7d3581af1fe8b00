//! Configuration types for Capstan servers

use crate::declaration::{BuildMode, BuildOptions};
use crate::error::{CapstanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_FILE: &str = "capstan.toml";

/// Environment variable naming an extra configuration file
pub const CONFIG_PATH_ENV: &str = "CAPSTAN_CONFIG_PATH";

/// Prefix of environment overrides (`CAPSTAN_BATCH__MAX_ITEMS=10`)
pub const ENV_PREFIX: &str = "CAPSTAN_";

/// Main configuration for a Capstan server
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CapstanConfig {
    /// Server identity reported by `initialize`
    pub server: ServerConfig,

    /// Registry freeze behaviour
    pub build: BuildConfig,

    /// Listing and hidden-call behaviour
    pub visibility: VisibilityConfig,

    /// Batch execution limits
    pub batch: BatchConfig,

    /// Session lifecycle
    pub sessions: SessionConfig,
}

/// Server identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "capstan".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Registry freeze behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// `strict` fails on any error, `lenient` skips offending capabilities
    pub mode: BuildMode,
}

/// Whether capabilities hidden from a caller may still be invoked directly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HiddenCallPolicy {
    /// Hidden only affects listings
    #[default]
    Allow,

    /// Hidden capabilities resolve only through their router namespace
    Deny,
}

/// Listing and hidden-call behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilityConfig {
    /// List router members next to the router unless a router overrides it
    pub flatten_routers: bool,

    pub hidden_call_policy: HiddenCallPolicy,
}

/// How the items of one batch are run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// All items at once, bounded by `max_concurrency`
    #[default]
    Parallel,

    /// One item at a time, in array order
    Sequential,
}

/// Batch execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Largest accepted batch, notifications excluded
    pub max_items: usize,

    /// Deadline shared by every item of a batch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub mode: BatchMode,

    /// Items running at once in parallel mode
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            timeout: Duration::from_secs(30),
            mode: BatchMode::Parallel,
            max_concurrency: 8,
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Create a session on `initialize`
    pub enabled: bool,

    /// Inactivity after which a session expires
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Period of the background sweeper
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CapstanConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `capstan.toml` in the working directory
    /// 3. The file named by `CAPSTAN_CONFIG_PATH`
    /// 4. `CAPSTAN_`-prefixed environment variables, nested keys split on `__`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid or the merged
    /// configuration fails [`validate`](Self::validate).
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(CapstanConfig::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }

        let config: CapstanConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| CapstanError::Configuration(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific TOML file, without env overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: CapstanConfig = Figment::from(Serialized::defaults(CapstanConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                CapstanError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty server name, zero batch limits, or zero
    /// session durations.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(CapstanError::Configuration(message.to_string()));

        if self.server.name.trim().is_empty() {
            return invalid("server.name must not be empty");
        }
        if self.batch.max_items == 0 {
            return invalid("batch.max_items must be at least 1");
        }
        if self.batch.max_concurrency == 0 {
            return invalid("batch.max_concurrency must be at least 1");
        }
        if self.batch.timeout.is_zero() {
            return invalid("batch.timeout must be greater than zero");
        }
        if self.sessions.idle_timeout.is_zero() {
            return invalid("sessions.idle_timeout must be greater than zero");
        }
        if self.sessions.sweep_interval.is_zero() {
            return invalid("sessions.sweep_interval must be greater than zero");
        }
        Ok(())
    }

    /// Freeze options derived from the `build` and `visibility` sections
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            mode: self.build.mode,
            flatten_routers: self.visibility.flatten_routers,
        }
    }
}
