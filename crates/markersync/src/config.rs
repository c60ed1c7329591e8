//! Configuration management for markersync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::marker::OwnerId;
use crate::placement::{
    PlacementPolicy, DEFAULT_DRIFT_THRESHOLD_METERS, DEFAULT_NEARBY_LIMIT,
    DEFAULT_NEARBY_RADIUS_METERS,
};
use crate::store::{DEFAULT_CHANGE_CAPACITY, DEFAULT_POLL_INTERVAL_MS};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "markersync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "markers.db";

/// Default object directory name.
const OBJECTS_DIR_NAME: &str = "objects";

/// Prefix for environment overrides. Nested keys are separated by `__`,
/// e.g. `MARKERSYNC_PLACEMENT__DRIFT_THRESHOLD_METERS=50`.
const ENV_PREFIX: &str = "MARKERSYNC_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `MARKERSYNC_`)
/// 2. TOML config file at `~/.config/markersync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Placement configuration.
    pub placement: PlacementConfig,
    /// Listener configuration.
    pub listener: ListenerConfig,
    /// Session configuration.
    pub session: SessionConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/markersync/markers.db`
    pub database_path: Option<PathBuf>,
    /// Directory uploaded photos are written to.
    /// Defaults to `~/.local/share/markersync/objects`
    pub objects_dir: Option<PathBuf>,
}

/// Placement-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Distance past which a saved marker is snapped back and re-saved.
    pub drift_threshold_meters: f64,
    /// Radius searched for nearby notes and photos.
    pub nearby_radius_meters: f64,
    /// Maximum number of nearby markers returned.
    pub nearby_limit: usize,
}

/// Listener-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Capacity of the store's change feed.
    pub channel_capacity: usize,
    /// How often the store checks for markers added by other sessions.
    pub poll_interval_ms: u64,
}

/// Session-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Owner signed in when no `--owner` flag is given.
    pub owner_id: Option<String>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            drift_threshold_meters: DEFAULT_DRIFT_THRESHOLD_METERS,
            nearby_radius_meters: DEFAULT_NEARBY_RADIUS_METERS,
            nearby_limit: DEFAULT_NEARBY_LIMIT,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANGE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `MARKERSYNC_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &std::path::Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let placement = &self.placement;

        if !(placement.drift_threshold_meters.is_finite() && placement.drift_threshold_meters > 0.0)
        {
            return Err(Error::ConfigValidation {
                message: format!(
                    "drift_threshold_meters must be a positive number (got {})",
                    placement.drift_threshold_meters
                ),
            });
        }

        if !(placement.nearby_radius_meters.is_finite() && placement.nearby_radius_meters > 0.0) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "nearby_radius_meters must be a positive number (got {})",
                    placement.nearby_radius_meters
                ),
            });
        }

        if placement.nearby_limit == 0 {
            return Err(Error::ConfigValidation {
                message: "nearby_limit must be greater than 0".to_string(),
            });
        }

        if self.listener.channel_capacity == 0 {
            return Err(Error::ConfigValidation {
                message: "channel_capacity must be greater than 0".to_string(),
            });
        }

        if self.listener.poll_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_interval_ms must be greater than 0".to_string(),
            });
        }

        if self
            .session
            .owner_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty() || id.contains('/'))
        {
            return Err(Error::ConfigValidation {
                message: "owner_id must be non-empty and must not contain '/'".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the objects directory, resolving defaults if not set.
    #[must_use]
    pub fn objects_dir(&self) -> PathBuf {
        self.storage
            .objects_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(OBJECTS_DIR_NAME))
    }

    /// Interval between polls for other sessions' additions.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.listener.poll_interval_ms)
    }

    /// The configured default owner, if any.
    #[must_use]
    pub fn default_owner(&self) -> Option<OwnerId> {
        self.session.owner_id.as_deref().map(OwnerId::new)
    }

    /// Placement thresholds as a policy.
    #[must_use]
    pub fn placement_policy(&self) -> PlacementPolicy {
        PlacementPolicy {
            drift_threshold_meters: self.placement.drift_threshold_meters,
            nearby_radius_meters: self.placement.nearby_radius_meters,
            nearby_limit: self.placement.nearby_limit,
        }
    }
}
