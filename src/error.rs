// src/error.rs - Crate-wide error kinds
use liveprint_shared::{Axis, PositionError};
use thiserror::Error;

/// A safety check in the extrusion planner rejected a move.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SafetyViolation {
    #[error("filament length too short (same position?): {length:.5}mm < {min}mm")]
    FilamentTooShort { length: f64, min: f64 },
    #[error("too much filament in one operation: {length:.4}mm > {max}mm")]
    FilamentTooLong { length: f64, max: f64 },
    #[error("move time too long: {time_ms:.1}ms > {max_ms}ms")]
    MoveTooLong { time_ms: f64, max_ms: f64 },
    #[error("{axis} {kind} speed too fast: {speed:.3}mm/s > {limit}mm/s")]
    AxisTooFast {
        axis: Axis,
        kind: &'static str,
        speed: f64,
        limit: f64,
    },
    #[error("move computation produced NaN")]
    NotANumber,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiveError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Safety violation: {0}")]
    Safety(#[from] SafetyViolation),
    #[error("Job {id} dropped: queue over capacity")]
    QueueOverflow { id: String },
    #[error("Job {id} expired before it could start")]
    Expired { id: String },
    #[error("Device error: {0}")]
    Device(String),
    #[error("Job panicked: {0}")]
    Panicked(String),
    #[error("Scheduler is stopped")]
    SchedulerStopped,
    #[error("Config error: {0}")]
    Config(String),
}

impl From<PositionError> for LiveError {
    fn from(err: PositionError) -> Self {
        LiveError::InvalidArgument(err.to_string())
    }
}

impl LiveError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        LiveError::InvalidArgument(msg.into())
    }

    pub fn is_device(&self) -> bool {
        matches!(self, LiveError::Device(_))
    }

    /// Errors after which the command worker is replaced.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LiveError::Device(_) | LiveError::Panicked(_))
    }
}

pub type Result<T> = std::result::Result<T, LiveError>;
