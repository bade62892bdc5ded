// src/motion/mod.rs - Coordinate/extrusion state machine

pub mod executor;
pub mod planner;
pub mod retraction;
pub mod state;

use serde::{Deserialize, Serialize};

pub use executor::{ExecutionReport, SegmentedMove};
pub use planner::{AbsoluteMove, MovePlan, MoveRequest, PolarMove};
pub use retraction::{Retraction, RetractionPhase};
pub use state::{KinematicState, SafetyLimits};

/// Shortest distance the executor will still move, mm.
pub const MIN_MOVE: f64 = 0.08;
/// Filament deltas below this are treated as "no filament specified".
pub const FILAMENT_EPSILON: f64 = 0.0001;
/// Below this much retracted filament there is nothing to unretract.
pub const MIN_RETRACTION: f64 = 0.01;

/// What happens when a segment would leave the machine envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Keep moving along the edge: coordinates are clamped per axis.
    #[default]
    Clamp,
    /// Reflect the velocity off the wall that is hit first.
    Bounce,
}

impl std::str::FromStr for BoundaryMode {
    type Err = crate::error::LiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clamp" | "clip" => Ok(BoundaryMode::Clamp),
            "bounce" => Ok(BoundaryMode::Bounce),
            other => Err(crate::error::LiveError::invalid(format!(
                "unknown boundary mode '{}'",
                other
            ))),
        }
    }
}

/// Degrees to radians.
pub fn d2r(angle: f64) -> f64 {
    angle.to_radians()
}

/// Radians to degrees.
pub fn r2d(angle: f64) -> f64 {
    angle.to_degrees()
}
