//! Robot controller configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CARTO_CONFIG)
//! 3. Environment variables

use carto_link::LinkConfig;
use carto_protocol::{Position, DEFAULT_TRAJECTORY_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest grid side: every coordinate must fit in one byte.
pub const MAX_GRID_SIDE: u16 = 256;

/// Robot controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link configuration.
    pub link: LinkConfig,
    /// Pilot configuration.
    pub pilot: PilotConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CARTO_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.link.apply_env_overrides();
        self.pilot.apply_env_overrides();
    }

    /// Checks the values that cannot be expressed on the wire or on the grid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.link.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "link.queue_capacity must be at least 1".to_string(),
            ));
        }
        self.pilot.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// A grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: u8,
    pub y: u8,
}

impl Cell {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }
}

/// Pilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Maximum number of commands in one trajectory.
    pub trajectory_capacity: usize,
    /// Pose assumed until the console sends one.
    pub start: Position,
    /// Grid extent along x.
    pub width: u16,
    /// Grid extent along y.
    pub height: u16,
    /// Cells the simulated sensor reports as blocked.
    pub obstacles: Vec<Cell>,
    /// Simulated duration of one motor command, in milliseconds.
    pub move_delay_ms: u64,
    /// Capacity of the queue between the dispatcher and the pilot.
    pub inbox_capacity: usize,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            trajectory_capacity: DEFAULT_TRAJECTORY_CAPACITY,
            start: Position::default(),
            width: MAX_GRID_SIDE,
            height: MAX_GRID_SIDE,
            obstacles: Vec::new(),
            move_delay_ms: 0,
            inbox_capacity: 256,
        }
    }
}

impl PilotConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("CARTO_TRAJECTORY_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.trajectory_capacity = n;
            }
        }

        if let Ok(delay) = std::env::var("CARTO_MOVE_DELAY_MS") {
            if let Ok(ms) = delay.parse() {
                self.move_delay_ms = ms;
            }
        }
    }

    /// Returns the simulated move duration.
    pub fn move_delay(&self) -> Duration {
        Duration::from_millis(self.move_delay_ms)
    }

    /// Returns whether a cell lies inside the configured grid.
    pub fn contains(&self, cell: Cell) -> bool {
        u16::from(cell.x) < self.width && u16::from(cell.y) < self.height
    }

    /// Validates pilot configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trajectory_capacity == 0 || self.trajectory_capacity > u8::MAX as usize {
            return Err(ConfigError::ValidationError(format!(
                "pilot.trajectory_capacity must be between 1 and {}, got {}",
                u8::MAX,
                self.trajectory_capacity
            )));
        }

        for (name, side) in [("width", self.width), ("height", self.height)] {
            if side == 0 || side > MAX_GRID_SIDE {
                return Err(ConfigError::ValidationError(format!(
                    "pilot.{} must be between 1 and {}, got {}",
                    name, MAX_GRID_SIDE, side
                )));
            }
        }

        let start = Cell::new(self.start.x, self.start.y);
        if !self.contains(start) {
            return Err(ConfigError::ValidationError(format!(
                "pilot.start ({}, {}) is outside the grid",
                start.x, start.y
            )));
        }

        for cell in &self.obstacles {
            if !self.contains(*cell) {
                return Err(ConfigError::ValidationError(format!(
                    "obstacle ({}, {}) is outside the grid",
                    cell.x, cell.y
                )));
            }
            if *cell == start {
                return Err(ConfigError::ValidationError(format!(
                    "obstacle ({}, {}) is the start cell",
                    cell.x, cell.y
                )));
            }
        }

        if self.inbox_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pilot.inbox_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
