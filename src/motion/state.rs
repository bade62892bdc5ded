// src/motion/state.rs - Kinematic state owned by a printing session
use liveprint_shared::printer_model::{DEFAULT_PRINT_SPEED, MIN_LAYER_HEIGHT};
use liveprint_shared::{Axis, Position, PrinterModel};

use crate::config::{Config, SafetyConfig};
use crate::error::{LiveError, Result};
use crate::motion::{BoundaryMode, Retraction};

/// Per-operation ceilings the planner checks before anything is emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    pub max_filament_per_operation: f64,
    pub min_filament_per_operation: f64,
    pub max_time_per_operation_ms: f64,
    pub max_move_per_cycle: f64,
}

impl From<&SafetyConfig> for SafetyLimits {
    fn from(cfg: &SafetyConfig) -> Self {
        Self {
            max_filament_per_operation: cfg.max_filament_per_operation,
            min_filament_per_operation: cfg.min_filament_per_operation,
            max_time_per_operation_ms: cfg.max_time_per_operation_ms,
            max_move_per_cycle: cfg.max_move_per_cycle,
        }
    }
}

/// Where the head is, where it is pointing, and how it prints.
///
/// Positions are only ever committed by the move executor or through the
/// setters here, which keep the position inside the envelope.
#[derive(Debug, Clone)]
pub struct KinematicState {
    model: &'static PrinterModel,
    position: Position,
    min: Position,
    max: Position,
    /// Radians, counter-clockwise from +x.
    heading: f64,
    /// Radians above the horizontal plane.
    elevation: f64,
    pending_distance: f64,
    print_speed: f64,
    travel_speed: f64,
    layer_height: f64,
    boundary_mode: BoundaryMode,
    bpm: f64,
    total_move_time_ms: f64,
    pub retraction: Retraction,
    pub limits: SafetyLimits,
}

impl KinematicState {
    pub fn new(config: &Config) -> Result<Self> {
        let model = PrinterModel::lookup(&config.printer.model).ok_or_else(|| {
            LiveError::Config(format!("unknown printer model '{}'", config.printer.model))
        })?;
        let mut state = Self {
            model,
            position: Position::xyze(0.0, 0.0, 0.0, 0.0),
            min: model.min_position(),
            max: model.max_position(),
            heading: 0.0,
            elevation: 0.0,
            pending_distance: 0.0,
            print_speed: DEFAULT_PRINT_SPEED,
            travel_speed: model.max_travel_speed.z,
            layer_height: config.printer.layer_height.max(MIN_LAYER_HEIGHT),
            boundary_mode: config.printer.boundary_mode,
            bpm: config.printer.bpm,
            total_move_time_ms: 0.0,
            retraction: Retraction::from_config(&config.retraction, &config.printer),
            limits: SafetyLimits::from(&config.safety),
        };
        state.set_properties(model);
        Ok(state)
    }

    /// Switch machine model: envelope, speeds and position are reset.
    pub fn set_properties(&mut self, model: &'static PrinterModel) {
        tracing::info!("Using printer model {}", model.id);
        self.model = model;
        self.min = model.min_position();
        self.max = model.max_position();
        self.position = Position::xyze(0.0, 0.0, 0.0, 0.0);
        self.print_speed = DEFAULT_PRINT_SPEED.min(model.max_print_speed.x);
        self.travel_speed = model.max_travel_speed.z;
        self.retraction.current = 0.0;
    }

    pub fn model(&self) -> &'static PrinterModel {
        self.model
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Overwrite the position; it must lie inside the envelope.
    pub fn set_position(&mut self, position: Position) -> Result<()> {
        for axis in Axis::ALL {
            position.require(axis)?;
        }
        if !position.within(&self.min, &self.max, 0.0) {
            return Err(LiveError::invalid(format!(
                "position {} outside envelope {} .. {}",
                position, self.min, self.max
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Apply a position reported by the device. Only the axes present are
    /// taken; values are clamped into the envelope.
    pub fn sync_position(&mut self, reported: &Position) {
        let mut next = self.position;
        for (axis, value) in reported.axes() {
            next = next.with(axis, value);
        }
        self.position = next.clamped(&self.min, &self.max);
    }

    pub(crate) fn commit(&mut self, position: Position) {
        self.position = position;
    }

    pub fn envelope(&self) -> (Position, Position) {
        (self.min, self.max)
    }

    /// Replace the envelope. The current position is pulled inside it.
    pub fn set_envelope(&mut self, min: Position, max: Position) -> Result<()> {
        for axis in Axis::ALL {
            let lo = min.require(axis)?;
            let hi = max.require(axis)?;
            if lo >= hi {
                return Err(LiveError::invalid(format!(
                    "envelope {} min {} must be below max {}",
                    axis, lo, hi
                )));
            }
        }
        self.min = min;
        self.max = max;
        self.position = self.position.clamped(&self.min, &self.max);
        Ok(())
    }

    /// Change one axis of the upper bound, keeping the others.
    pub fn set_max(&mut self, axis: Axis, value: f64) -> Result<()> {
        let max = self.max.with(axis, value);
        self.set_envelope(self.min, max)
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn set_heading(&mut self, radians: f64) {
        self.heading = radians;
    }

    /// Turn relative to the current heading, in degrees.
    pub fn turn(&mut self, degrees: f64) {
        self.heading += degrees.to_radians();
    }

    pub fn turn_to(&mut self, degrees: f64) {
        self.heading = degrees.to_radians();
    }

    pub fn elevation(&self) -> f64 {
        self.elevation
    }

    pub fn set_elevation(&mut self, degrees: f64) {
        self.elevation = degrees.to_radians();
    }

    pub fn pending_distance(&self) -> f64 {
        self.pending_distance
    }

    pub fn set_distance(&mut self, distance: f64) {
        self.pending_distance = distance;
    }

    /// Consume the queued polar request, resetting distance and elevation.
    pub fn take_polar(&mut self) -> (f64, f64, f64) {
        let taken = (self.heading, self.elevation, self.pending_distance);
        self.pending_distance = 0.0;
        self.elevation = 0.0;
        taken
    }

    pub fn print_speed(&self) -> f64 {
        self.print_speed
    }

    /// mm/s, capped at the model's fastest x print speed.
    pub fn set_print_speed(&mut self, speed: f64) -> Result<f64> {
        let speed = validate_speed(speed)?.min(self.model.max_print_speed.x);
        self.print_speed = speed;
        Ok(speed)
    }

    pub fn travel_speed(&self) -> f64 {
        self.travel_speed
    }

    pub fn set_travel_speed(&mut self, speed: f64) -> Result<f64> {
        let speed = validate_speed(speed)?.min(self.model.max_travel_speed.x);
        self.travel_speed = speed;
        Ok(speed)
    }

    pub fn layer_height(&self) -> f64 {
        self.layer_height
    }

    pub fn set_layer_height(&mut self, height: f64) -> Result<f64> {
        if !height.is_finite() {
            return Err(LiveError::invalid(format!("bad layer height {}", height)));
        }
        self.layer_height = height.max(MIN_LAYER_HEIGHT);
        Ok(self.layer_height)
    }

    pub fn boundary_mode(&self) -> BoundaryMode {
        self.boundary_mode
    }

    pub fn set_boundary_mode(&mut self, mode: BoundaryMode) {
        self.boundary_mode = mode;
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<()> {
        if !(bpm > 0.0) {
            return Err(LiveError::invalid(format!("bpm must be > 0, got {}", bpm)));
        }
        self.bpm = bpm;
        Ok(())
    }

    pub fn total_move_time_ms(&self) -> f64 {
        self.total_move_time_ms
    }

    pub(crate) fn add_move_time(&mut self, ms: f64) {
        self.total_move_time_ms += ms;
    }

    pub(crate) fn reset_move_time(&mut self) {
        self.total_move_time_ms = 0.0;
    }
}

fn validate_speed(speed: f64) -> Result<f64> {
    if speed.is_nan() || speed <= 0.0 {
        return Err(LiveError::invalid(format!("speed must be > 0, got {}", speed)));
    }
    Ok(speed)
}
