//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Config file: `--config <path>`, else `./tether.toml` if it exists
//! 3. Environment variables: `TETHER_*`
//!
//! # Example Config
//!
//! ```toml
//! [reconcile]
//! short_wait_secs = 30
//! max_jitter_ms = 1500
//!
//! [[bindings]]
//! claim = "database.example.org/v1alpha1/MySQLInstance"
//! class = "database.example.org/v1alpha1/MySQLInstanceClass"
//! managed = "database.example.org/v1alpha1/CloudSQLInstance"
//! status_subresource = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION STRUCTURES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub reconcile: ReconcileConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub propagation: PropagationConfig,
    pub bindings: Vec<BindingConfig>,
}

/// Timing knobs shared by every control loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Requeue delay after a recoverable failure or while waiting on a dependency.
    pub short_wait_secs: u64,
    /// Requeue delay while waiting on something unlikely to change soon.
    pub long_wait_secs: u64,
    /// Deadline applied to every single reconcile invocation.
    pub timeout_secs: u64,
    /// Upper bound of the random sleep before a class defaulting write.
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub poll_interval_ms: u64,
    pub max_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PropagationConfig {
    pub enabled: bool,
}

/// One claim/class/managed kind triple served by a binding loop.
///
/// Kinds are written as `group/version/Kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingConfig {
    pub claim: String,
    pub class: String,
    pub managed: String,
    /// Whether the managed kind persists status separately from spec.
    #[serde(default)]
    pub status_subresource: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            short_wait_secs: 30,
            long_wait_secs: 60,
            timeout_secs: 60,
            max_jitter_ms: 1500,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_rounds: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ReconcileConfig {
    pub const fn short_wait(&self) -> Duration {
        Duration::from_secs(self.short_wait_secs)
    }

    pub const fn long_wait(&self) -> Duration {
        Duration::from_secs(self.long_wait_secs)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub const fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }
}

impl RuntimeConfig {
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADING
// ═══════════════════════════════════════════════════════════════════════════

/// Load configuration with the full hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - An explicitly requested config file does not exist or cannot be read
/// - The TOML is malformed
/// - An environment override cannot be parsed
/// - The resulting values fail validation
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    // 1. Start with built-in defaults
    let mut config = Config::default();

    // 2. Load the config file, if any
    match path {
        Some(explicit) => config = load_toml_file(explicit)?,
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            if fallback.exists() {
                config = load_toml_file(&fallback)?;
            }
        }
    }

    // 3. Apply environment variable overrides
    config.apply_env(|name| std::env::var(name).ok())?;

    // 4. Validate
    config.validate()?;

    Ok(config)
}

/// Load and parse a TOML config file. Missing fields take their defaults.
///
/// # Errors
///
/// Returns error if the file cannot be read or the TOML is malformed.
fn load_toml_file(path: &Path) -> Result<Config> {
    let content =
        std::fs::read_to_string(path).map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    debug!(path = %path.display(), "Loading configuration file");

    toml::from_str(&content).map_err(|e| Error::toml_parse_failed(path, e.to_string()))
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| Error::invalid_env_var(name, e.to_string()))
}

impl Config {
    /// Apply `TETHER_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns error if an override value cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("TETHER_SHORT_WAIT_SECS") {
            self.reconcile.short_wait_secs = parse_env("TETHER_SHORT_WAIT_SECS", &value)?;
        }

        if let Some(value) = lookup("TETHER_LONG_WAIT_SECS") {
            self.reconcile.long_wait_secs = parse_env("TETHER_LONG_WAIT_SECS", &value)?;
        }

        if let Some(value) = lookup("TETHER_TIMEOUT_SECS") {
            self.reconcile.timeout_secs = parse_env("TETHER_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = lookup("TETHER_MAX_JITTER_MS") {
            self.reconcile.max_jitter_ms = parse_env("TETHER_MAX_JITTER_MS", &value)?;
        }

        if let Some(value) = lookup("TETHER_POLL_INTERVAL_MS") {
            self.runtime.poll_interval_ms = parse_env("TETHER_POLL_INTERVAL_MS", &value)?;
        }

        if let Some(value) = lookup("TETHER_MAX_ROUNDS") {
            self.runtime.max_rounds = parse_env("TETHER_MAX_ROUNDS", &value)?;
        }

        if let Some(value) = lookup("TETHER_LOG") {
            self.logging.filter = value;
        }

        if let Some(value) = lookup("TETHER_PROPAGATION_ENABLED") {
            self.propagation.enabled = parse_env("TETHER_PROPAGATION_ENABLED", &value)?;
        }

        Ok(())
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.reconcile.short_wait_secs == 0 {
            return Err(Error::invalid_config("short_wait_secs must be at least 1"));
        }

        if self.reconcile.long_wait_secs < self.reconcile.short_wait_secs {
            return Err(Error::invalid_config(
                "long_wait_secs must not be shorter than short_wait_secs",
            ));
        }

        if self.reconcile.timeout_secs == 0 {
            return Err(Error::invalid_config("timeout_secs must be at least 1"));
        }

        if self.reconcile.max_jitter_ms > 60_000 {
            return Err(Error::invalid_config("max_jitter_ms must be 0-60000"));
        }

        if self.runtime.max_rounds == 0 {
            return Err(Error::invalid_config("max_rounds must be at least 1"));
        }

        for binding in &self.bindings {
            for kind in [&binding.claim, &binding.class, &binding.managed] {
                if kind.split('/').filter(|part| !part.is_empty()).count() < 2 {
                    return Err(Error::invalid_config(format!(
                        "binding kind '{kind}' must be written as group/version/Kind"
                    )));
                }
            }
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
