// src/motion/planner.rs - Extrusion planner: turns a move request into a checked plan
use liveprint_shared::{Axis, AxisLimits, Position};

use crate::error::{Result, SafetyViolation};
use crate::motion::{FILAMENT_EPSILON, KinematicState};

/// Head-relative move along the current heading and elevation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarMove {
    /// Radians in the xy plane.
    pub heading: f64,
    /// Radians above horizontal.
    pub elevation: f64,
    pub distance: f64,
    /// Extrude automatically while moving.
    pub extrude: bool,
    pub speed: Option<f64>,
    pub retract: Option<bool>,
}

/// Absolute target. Omitted axes stay where they are; an omitted `e`
/// means "compute the filament for me".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AbsoluteMove {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub speed: Option<f64>,
    pub retract: Option<bool>,
}

impl AbsoluteMove {
    pub fn to(x: f64, y: f64, z: f64) -> Self {
        Self { x: Some(x), y: Some(y), z: Some(z), ..Default::default() }
    }

    pub fn with_e(mut self, e: f64) -> Self {
        self.e = Some(e);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_retract(mut self, retract: bool) -> Self {
        self.retract = Some(retract);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveRequest {
    Polar(PolarMove),
    Absolute(AbsoluteMove),
}

/// A move that passed every safety check and is ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    pub start: Position,
    pub target: Position,
    /// xyz distance, mm.
    pub distance: f64,
    /// Filament change over the whole move, mm (or mm^3 on volumetric machines).
    pub filament: f64,
    /// mm/s
    pub speed: f64,
    pub move_time_ms: f64,
    pub extruding: bool,
    /// Filament was given explicitly instead of computed.
    pub manual_extrusion: bool,
    pub should_retract: bool,
}

impl MovePlan {
    /// Velocity for one mm of xyz travel; `e` carries filament per mm.
    /// Pure filament moves have no direction and get a zero xyz component.
    pub fn unit_velocity(&self) -> Position {
        if self.distance < FILAMENT_EPSILON {
            return Position::xyze(0.0, 0.0, 0.0, 0.0);
        }
        Position::xyze(
            (self.target.x() - self.start.x()) / self.distance,
            (self.target.y() - self.start.y()) / self.distance,
            (self.target.z() - self.start.z()) / self.distance,
            self.filament / self.distance,
        )
    }
}

/// Resolve a polar request into an absolute one from the current position.
pub fn polar_to_absolute(position: &Position, polar: &PolarMove) -> AbsoluteMove {
    let (horizontal, vertical) = if polar.elevation.abs() > f64::EPSILON {
        (
            polar.distance * polar.elevation.cos(),
            polar.distance * polar.elevation.sin(),
        )
    } else {
        (polar.distance, 0.0)
    };
    AbsoluteMove {
        x: Some(position.x() + horizontal * polar.heading.cos()),
        y: Some(position.y() + horizontal * polar.heading.sin()),
        z: Some(position.z() + vertical),
        // travel keeps filament where it is
        e: (!polar.extrude).then(|| position.e()),
        speed: polar.speed,
        retract: polar.retract,
    }
}

/// Check a request against the machine and produce a plan.
///
/// Returns `Ok(None)` for a travel move that goes nowhere. Nothing is
/// mutated; the executor commits state.
pub fn plan(state: &KinematicState, request: &MoveRequest) -> Result<Option<MovePlan>> {
    let current = state.position();
    let request = match request {
        MoveRequest::Polar(polar) => polar_to_absolute(&current, polar),
        MoveRequest::Absolute(abs) => *abs,
    };
    let target_xyz = Position::xyz(
        request.x.unwrap_or(current.x()),
        request.y.unwrap_or(current.y()),
        request.z.unwrap_or(current.z()),
    );

    let manual = request.e.is_some();
    let manual_delta = request.e.map(|e| e - current.e()).unwrap_or(0.0);
    let extruding = !manual || manual_delta.abs() > FILAMENT_EPSILON;

    let speed = request.speed.unwrap_or(if extruding {
        state.print_speed()
    } else {
        state.travel_speed()
    });
    if speed.is_nan() || speed <= 0.0 {
        return Err(crate::error::LiveError::invalid(format!(
            "move speed must be > 0, got {}",
            speed
        )));
    }

    let delta = target_xyz.sub(&current.spatial())?;
    let distance = delta.mag();
    if distance.is_nan() {
        return Err(SafetyViolation::NotANumber.into());
    }
    if !extruding && distance < FILAMENT_EPSILON {
        tracing::debug!("Skipping zero-length travel to {}", target_xyz);
        return Ok(None);
    }

    let limits = state.limits;
    let filament = if manual {
        manual_delta
    } else {
        let layer = state.layer_height();
        let mut length = distance * layer * layer;
        if length > limits.max_filament_per_operation {
            return Err(SafetyViolation::FilamentTooLong {
                length,
                max: limits.max_filament_per_operation,
            }
            .into());
        }
        if !state.model().volumetric {
            length /= state.model().filament_area();
        }
        if length < limits.min_filament_per_operation {
            return Err(SafetyViolation::FilamentTooShort {
                length,
                min: limits.min_filament_per_operation,
            }
            .into());
        }
        length
    };
    if filament.abs() > limits.max_filament_per_operation {
        return Err(SafetyViolation::FilamentTooLong {
            length: filament.abs(),
            max: limits.max_filament_per_operation,
        }
        .into());
    }

    let move_time_ms = if distance < FILAMENT_EPSILON {
        1000.0 * filament.abs() / speed
    } else {
        1000.0 * distance / speed
    };
    if move_time_ms.is_nan() {
        return Err(SafetyViolation::NotANumber.into());
    }
    if move_time_ms > limits.max_time_per_operation_ms {
        return Err(SafetyViolation::MoveTooLong {
            time_ms: move_time_ms,
            max_ms: limits.max_time_per_operation_ms,
        }
        .into());
    }

    let model = state.model();
    let (axis_limits, kind) = if extruding {
        (&model.max_print_speed, "print")
    } else {
        (&model.max_travel_speed, "travel")
    };
    let seconds = move_time_ms / 1000.0;
    check_axis_speed(Axis::X, delta.x(), seconds, axis_limits, kind)?;
    check_axis_speed(Axis::Y, delta.y(), seconds, axis_limits, kind)?;
    check_axis_speed(Axis::Z, delta.z(), seconds, axis_limits, kind)?;
    if extruding {
        check_axis_speed(Axis::E, filament, seconds, axis_limits, kind)?;
    }

    let should_retract = !manual
        && filament > 0.0
        && match request.retract {
            Some(explicit) => explicit,
            None => state.retraction.auto,
        };

    let target = target_xyz.with(Axis::E, current.e() + filament);
    Ok(Some(MovePlan {
        start: current,
        target,
        distance,
        filament,
        speed,
        move_time_ms,
        extruding,
        manual_extrusion: manual,
        should_retract,
    }))
}

fn check_axis_speed(
    axis: Axis,
    delta: f64,
    seconds: f64,
    limits: &AxisLimits,
    kind: &'static str,
) -> Result<()> {
    if seconds <= 0.0 {
        return Ok(());
    }
    let speed = delta.abs() / seconds;
    let limit = limits.get(axis);
    // a hair of tolerance for speeds that sit exactly on the limit
    if speed > limit + 1e-9 {
        return Err(SafetyViolation::AxisTooFast { axis, kind, speed, limit }.into());
    }
    Ok(())
}
