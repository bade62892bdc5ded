//! # Session Configuration
//!
//! TOML configuration for a live printing session: machine model, boundary
//! policy, retraction, safety ceilings, and the two schedulers.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! model = "UM2plus"
//! boundary_mode = "bounce"
//! layer_height = 0.25
//!
//! [retraction]
//! length = 6.0
//! speed = 30.0
//!
//! [queue]
//! max_queued = 500
//! expiration_ms = 240000
//! min_interval_ms = 25
//!
//! [tasks]
//! temperature_poll_ms = 2000
//! ```
//!
//! Every field is optional; missing values fall back to the defaults below.

// src/config.rs - Single configuration file
use liveprint_shared::PrinterModel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::motion::BoundaryMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the session.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub retraction: RetractionConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
}

/// Machine and motion defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub boundary_mode: BoundaryMode,
    #[serde(default = "default_true")]
    pub auto_retract: bool,
    #[serde(default)]
    pub firmware_retract: bool,
    #[serde(default = "default_layer_height")]
    pub layer_height: f64,
    #[serde(default = "default_bpm")]
    pub bpm: f64,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            boundary_mode: BoundaryMode::default(),
            auto_retract: true,
            firmware_retract: false,
            layer_height: default_layer_height(),
            bpm: default_bpm(),
        }
    }
}

/// Filament retraction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetractionConfig {
    #[serde(default = "default_retract_length")]
    pub length: f64,
    /// mm/s
    #[serde(default = "default_retract_speed")]
    pub speed: f64,
    #[serde(default)]
    pub extra_unretract: f64,
    #[serde(default)]
    pub z_hop: f64,
}

impl Default for RetractionConfig {
    fn default() -> Self {
        Self {
            length: default_retract_length(),
            speed: default_retract_speed(),
            extra_unretract: 0.0,
            z_hop: 0.0,
        }
    }
}

/// Per-operation safety ceilings enforced by the planner.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_filament")]
    pub max_filament_per_operation: f64,
    #[serde(default = "default_min_filament")]
    pub min_filament_per_operation: f64,
    #[serde(default = "default_max_time_ms")]
    pub max_time_per_operation_ms: f64,
    #[serde(default = "default_max_move_per_cycle")]
    pub max_move_per_cycle: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_filament_per_operation: default_max_filament(),
            min_filament_per_operation: default_min_filament(),
            max_time_per_operation_ms: default_max_time_ms(),
            max_move_per_cycle: default_max_move_per_cycle(),
        }
    }
}

/// Command scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
    /// 0 disables expiration.
    #[serde(default)]
    pub expiration_ms: u64,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    /// Shortest gap between two units starting, ms.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queued: default_max_queued(),
            expiration_ms: 0,
            default_priority: default_priority(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

impl QueueConfig {
    pub fn expiration(&self) -> Option<Duration> {
        (self.expiration_ms > 0).then(|| Duration::from_millis(self.expiration_ms))
    }
}

/// Timed task scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,
    /// 0 disables the temperature poll.
    #[serde(default)]
    pub temperature_poll_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_ms(),
            temperature_poll_ms: 0,
        }
    }
}

impl Config {
    /// Validate semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if PrinterModel::lookup(&self.printer.model).is_none() {
            let known: Vec<&str> = PrinterModel::ids().collect();
            return Err(ConfigError::Invalid(format!(
                "unknown printer model '{}' (known: {})",
                self.printer.model,
                known.join(", ")
            )));
        }
        if self.printer.layer_height <= 0.0 {
            return Err(ConfigError::Invalid("layer_height must be > 0".to_string()));
        }
        if self.printer.bpm <= 0.0 {
            return Err(ConfigError::Invalid("bpm must be > 0".to_string()));
        }
        if self.retraction.length < 0.0 || self.retraction.speed <= 0.0 {
            return Err(ConfigError::Invalid(
                "retraction length must be >= 0 and speed > 0".to_string(),
            ));
        }
        if self.safety.max_move_per_cycle <= 0.0 {
            return Err(ConfigError::Invalid("max_move_per_cycle must be > 0".to_string()));
        }
        if self.queue.max_queued == 0 {
            return Err(ConfigError::Invalid("queue max_queued must be > 0".to_string()));
        }
        if self.tasks.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_model() -> String { liveprint_shared::printer_model::DEFAULT_MODEL.to_string() }
fn default_true() -> bool { true }
fn default_layer_height() -> f64 { 0.2 }
fn default_bpm() -> f64 { 120.0 }
fn default_retract_length() -> f64 { 8.5 }
fn default_retract_speed() -> f64 { 30.0 }
fn default_max_filament() -> f64 { 30.0 }
fn default_min_filament() -> f64 { 0.0002 }
fn default_max_time_ms() -> f64 { 60000.0 }
fn default_max_move_per_cycle() -> f64 { 200.0 }
fn default_max_queued() -> usize { 10000 }
fn default_priority() -> u8 { crate::scheduler::command_queue::DEFAULT_PRIORITY }
fn default_min_interval_ms() -> u64 { 25 }
fn default_tick_ms() -> u64 { 10 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
