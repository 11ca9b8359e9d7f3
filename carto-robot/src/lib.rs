//! # carto-robot
//!
//! Robot controller for carto.
//!
//! This crate provides:
//! - Configuration loading from YAML and environment variables
//! - The pilot that executes console commands and reports position,
//!   obstacles and completed moves
//! - Motor and obstacle sensor abstractions with simulated implementations

pub mod config;
pub mod pilot;

pub use config::{Cell, Config, ConfigError, PilotConfig};
pub use pilot::{Drive, GridSensor, Inbound, LoggingDrive, ObstacleSensor, Pilot, StopSignal};
