//! Server configuration, read from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::map::GridGenerator;
use crate::player::MotionBounds;

pub const CONFIG_PATH_ENV: &str = "DUNGEON_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub autosave_secs: u64,
    /// Players with these usernames may run admin commands
    pub admin_usernames: Vec<String>,
    pub map: MapConfig,
    pub player: PlayerConfig,
    pub movement: MovementConfig,
    pub combat: CombatConfig,
    pub persistence: PersistenceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            database_url: "sqlite:dungeon.db?mode=rwc".to_string(),
            autosave_secs: 30,
            admin_usernames: Vec::new(),
            map: MapConfig::default(),
            player: PlayerConfig::default(),
            movement: MovementConfig::default(),
            combat: CombatConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub size: usize,
    pub room_limit: usize,
    pub turn_chance: f64,
    pub walkers: usize,
    /// Fixed seed; unset draws a fresh one on every generation
    pub seed: Option<u64>,
    pub store_count: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            size: 25,
            room_limit: 150,
            turn_chance: 0.25,
            walkers: 2,
            seed: None,
            store_count: 2,
        }
    }
}

impl MapConfig {
    pub fn generator(&self) -> GridGenerator {
        GridGenerator {
            size: self.size,
            room_limit: self.room_limit,
            turn_chance: self.turn_chance,
            walkers: self.walkers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub max_weight: i32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self { max_weight: crate::player::DEFAULT_MAX_WEIGHT }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub tick_ms: u64,
    pub bound: f32,
    pub edge_threshold: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            tick_ms: 15,
            bound: 1.0,
            edge_threshold: 0.9,
        }
    }
}

impl MovementConfig {
    pub fn bounds(&self) -> MotionBounds {
        MotionBounds {
            bound: self.bound,
            edge_threshold: self.edge_threshold,
        }
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CombatConfig {
    pub stake_weight_cap: i32,
    /// Force resolution after this many seconds; unset waits for both stakes
    pub timeout_secs: Option<u64>,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            stake_weight_cap: crate::combat::STAKE_WEIGHT_CAP,
            timeout_secs: None,
        }
    }
}

impl CombatConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_backoff_ms: 250,
        }
    }
}

impl ServerConfig {
    /// Parse a config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Load from `DUNGEON_CONFIG` (or the default path), falling back to
    /// defaults when the file does not exist. `DATABASE_URL` wins over the file.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::load_or_default(Path::new(&path))?;
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database_url = url;
        }
        Ok(config)
    }

    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admin_usernames.iter().any(|name| name == username)
    }
}
