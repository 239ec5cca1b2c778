//! TOML-based configuration for Concord.
//!
//! Every section is optional; a missing file section falls back to its
//! defaults. A couple of deployment-specific values can be overridden from
//! the environment via [`AppConfig::apply_env_overrides`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::BUILTIN_PROVIDERS;
use crate::errors::ConfigError;
use crate::tree_diff::TreeDiffOptions;

/// Environment variable overriding `store.data_dir`.
pub const ENV_DATA_DIR: &str = "CONCORD_DATA_DIR";

/// Environment variable overriding `store.log_level`.
pub const ENV_LOG_LEVEL: &str = "CONCORD_LOG_LEVEL";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Storage location and logging.
    #[serde(default)]
    pub store: StoreConfig,

    /// Conflict resolution chain settings.
    #[serde(default)]
    pub resolution: ResolutionConfig,

    /// Version store settings.
    #[serde(default)]
    pub versions: VersionsConfig,

    /// Structural diff settings.
    #[serde(default)]
    pub diff: DiffConfig,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database file name inside `data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".concord")
}
fn default_log_level() -> String {
    "info".into()
}
fn default_database_file() -> String {
    "concord.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            database_file: default_database_file(),
        }
    }
}

impl StoreConfig {
    /// Full path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Built-in providers to register besides `manual` (which is always on).
    #[serde(default = "default_providers")]
    pub providers: Vec<String>,

    /// Reuse earlier successful resolutions of the same conflict.
    #[serde(default = "default_true")]
    pub cache_resolutions: bool,
}

fn default_providers() -> Vec<String> {
    vec!["lww".into(), "add-wins".into()]
}
fn default_true() -> bool {
    true
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            cache_resolutions: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Versions / diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionsConfig {
    /// Store used when a command does not name one.
    #[serde(default = "default_store")]
    pub default_store: String,
}

fn default_store() -> String {
    "main".into()
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            default_store: default_store(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Emit `equal` edits for unchanged leaves.
    #[serde(default)]
    pub emit_equal: bool,
}

impl DiffConfig {
    pub fn options(&self) -> TreeDiffOptions {
        TreeDiffOptions {
            emit_equal: self.emit_equal,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading and validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** apply environment overrides -- call
    /// [`apply_env_overrides`](Self::apply_env_overrides) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply `CONCORD_DATA_DIR` and `CONCORD_LOG_LEVEL` if they are set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = env_override(ENV_DATA_DIR, "store.data_dir") {
            self.store.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = env_override(ENV_LOG_LEVEL, "store.log_level") {
            self.store.log_level = level;
        }
        Ok(())
    }

    /// Validate that all fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.store.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "store.log_level".into(),
                detail: format!(
                    "'{}' is not one of {}",
                    self.store.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.store.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.resolution.providers {
            if !BUILTIN_PROVIDERS.contains(&name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "resolution.providers".into(),
                    detail: format!(
                        "unknown provider '{}' (expected one of {})",
                        name,
                        BUILTIN_PROVIDERS.join(", ")
                    ),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "resolution.providers".into(),
                    detail: format!("provider '{}' listed twice", name),
                });
            }
        }

        if self.versions.default_store.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "versions.default_store".into(),
                detail: "default store name must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, apply overrides, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

/// Read an override from the environment. Unset or empty means "no override".
fn env_override(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "applied environment override");
            Some(val)
        }
        _ => None,
    }
}
