//! Configuration loading, validation, and management for the enrichment system.
//!
//! Loads configuration from `~/.enrichments/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.enrichments/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Capacity and schema settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Visual token pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Orbit layout settings
    #[serde(default)]
    pub presenter: PresenterConfig,

    /// Record persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Version migration rules, applied first-match in declaration order
    #[serde(default)]
    pub migrations: Vec<MigrationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Slots every item starts with
    #[serde(default = "default_capacity")]
    pub default_capacity: u32,

    /// Schema version records are migrated to
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

fn default_capacity() -> u32 {
    4
}
fn default_schema_version() -> u32 {
    1
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
            schema_version: default_schema_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Tokens instantiated by the one-time warm-up
    #[serde(default = "default_prewarm_count")]
    pub prewarm_count: usize,

    /// Base token asset
    #[serde(default = "default_token_asset_key")]
    pub token_asset_key: String,

    /// Per-token sub-resource (icon/video binding points)
    #[serde(default = "default_rig_asset_key")]
    pub rig_asset_key: String,

    /// Delay before the enter transition starts
    #[serde(default = "default_enter_delay")]
    pub enter_delay_secs: f32,

    #[serde(default = "default_transition_secs")]
    pub enter_duration_secs: f32,

    #[serde(default = "default_transition_secs")]
    pub release_duration_secs: f32,
}

fn default_prewarm_count() -> usize {
    8
}
fn default_token_asset_key() -> String {
    "Enrichments.Prefab.Orb".into()
}
fn default_rig_asset_key() -> String {
    "Enrichments.Prefab.Message".into()
}
fn default_enter_delay() -> f32 {
    0.25
}
fn default_transition_secs() -> f32 {
    1.0
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prewarm_count: default_prewarm_count(),
            token_asset_key: default_token_asset_key(),
            rig_asset_key: default_rig_asset_key(),
            enter_delay_secs: default_enter_delay(),
            enter_duration_secs: default_transition_secs(),
            release_duration_secs: default_transition_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenterConfig {
    /// Radius of the ring tokens orbit on
    #[serde(default = "default_orbit_radius")]
    pub orbit_radius: f32,

    /// How fast the orbit anchor follows its target, per second
    #[serde(default = "default_follow_rate")]
    pub follow_rate: f32,
}

fn default_orbit_radius() -> f32 {
    0.15
}
fn default_follow_rate() -> f32 {
    10.0
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            orbit_radius: default_orbit_radius(),
            follow_rate: default_follow_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" or "file"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Path of the file backend (defaults under the config directory)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "memory".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The file backend path, falling back to `~/.enrichments/records.jsonl`.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("records.jsonl"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A single-step record migration rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Unique name for this rule (used in logs)
    pub name: String,

    pub source_version: u32,

    pub target_version: u32,

    /// Apply automatically on load; otherwise the stale record is left alone
    #[serde(default = "default_true")]
    pub auto_update: bool,

    /// Enrichment ids to rename (old id → new id)
    #[serde(default)]
    pub renames: BTreeMap<String, String>,

    /// Enrichment ids to drop
    #[serde(default)]
    pub removed: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from the default path (~/.enrichments/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `ENRICHMENTS_DEFAULT_CAPACITY`
    /// - `ENRICHMENTS_POOL_PREWARM`
    /// - `ENRICHMENTS_LOG_LEVEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("ENRICHMENTS_DEFAULT_CAPACITY") {
            self.lifecycle.default_capacity = parse_env("ENRICHMENTS_DEFAULT_CAPACITY", &value)?;
        }
        if let Ok(value) = std::env::var("ENRICHMENTS_POOL_PREWARM") {
            self.pool.prewarm_count = parse_env("ENRICHMENTS_POOL_PREWARM", &value)?;
        }
        if let Ok(level) = std::env::var("ENRICHMENTS_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".enrichments")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lifecycle.default_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "lifecycle.default_capacity must be at least 1".into(),
            ));
        }

        let durations = [
            ("pool.enter_delay_secs", self.pool.enter_delay_secs),
            ("pool.enter_duration_secs", self.pool.enter_duration_secs),
            ("pool.release_duration_secs", self.pool.release_duration_secs),
        ];
        for (name, value) in durations {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be a non-negative number of seconds"
                )));
            }
        }

        if !(self.presenter.orbit_radius.is_finite() && self.presenter.orbit_radius > 0.0) {
            return Err(ConfigError::ValidationError(
                "presenter.orbit_radius must be > 0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "memory" | "file") {
            return Err(ConfigError::ValidationError(format!(
                "unknown store backend '{}' (expected \"memory\" or \"file\")",
                self.store.backend
            )));
        }

        for rule in &self.migrations {
            if rule.source_version == rule.target_version {
                return Err(ConfigError::ValidationError(format!(
                    "migration '{}' has identical source and target version {}",
                    rule.name, rule.source_version
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{name}='{value}' is not a valid number")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
