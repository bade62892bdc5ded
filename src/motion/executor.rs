// src/motion/executor.rs - Walks a plan in bounded segments and emits G1 moves
use liveprint_shared::{Axis, Position};

use crate::communication::InstructionSink;
use crate::error::Result;
use crate::motion::{BoundaryMode, KinematicState, MIN_MOVE, MovePlan, retraction};

/// Reflections allowed without progress before the move is abandoned.
const MAX_STALLS: usize = 4;
const COORD_DECIMALS: i32 = 4;

/// One committed piece of a move.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub position: Position,
    /// xyz length, mm.
    pub length: f64,
    /// Axes whose velocity was reflected at the end of this segment.
    pub reflected: Vec<Axis>,
}

/// Iterator-like walk of a plan through the envelope.
#[derive(Debug, Clone)]
pub struct SegmentedMove {
    velocity: Position,
    remaining: f64,
    max_step: f64,
    mode: BoundaryMode,
}

impl SegmentedMove {
    pub fn new(plan: &MovePlan, mode: BoundaryMode, max_step: f64) -> Self {
        Self {
            velocity: plan.unit_velocity(),
            remaining: plan.distance,
            max_step,
            mode,
        }
    }

    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn velocity(&self) -> Position {
        self.velocity
    }

    /// Compute the next position from `from`, or `None` once less than the
    /// minimum movable distance is left.
    pub fn step(&mut self, from: &Position, min: &Position, max: &Position) -> Option<Segment> {
        if self.remaining.is_nan() || self.remaining < MIN_MOVE {
            return None;
        }
        let amount = self.remaining.min(self.max_step);
        let naive = advance(from, &self.velocity, amount);

        let segment = match self.mode {
            BoundaryMode::Clamp => Segment {
                position: naive.clamped(min, max),
                length: amount,
                reflected: Vec::new(),
            },
            BoundaryMode::Bounce => {
                let (hit_time, hit_axes) = first_wall_hit(from, &naive, &self.velocity, min, max);
                if hit_axes.is_empty() {
                    Segment {
                        position: naive.clamped(min, max),
                        length: amount,
                        reflected: Vec::new(),
                    }
                } else {
                    let position = advance(from, &self.velocity, hit_time).clamped(min, max);
                    for axis in &hit_axes {
                        let v = self.velocity.get(*axis).unwrap_or(0.0);
                        self.velocity = self.velocity.with(*axis, -v);
                    }
                    Segment {
                        position,
                        length: hit_time,
                        reflected: hit_axes,
                    }
                }
            }
        };
        self.remaining -= segment.length;
        Some(segment)
    }
}

fn advance(from: &Position, velocity: &Position, amount: f64) -> Position {
    Position::xyze(
        from.x() + velocity.x() * amount,
        from.y() + velocity.y() * amount,
        from.z() + velocity.z() * amount,
        from.e() + velocity.e() * amount,
    )
}

/// Distance along `velocity` until the first wall, and every axis that
/// reaches a wall at that same distance.
fn first_wall_hit(
    from: &Position,
    naive: &Position,
    velocity: &Position,
    min: &Position,
    max: &Position,
) -> (f64, Vec<Axis>) {
    let mut best = f64::INFINITY;
    let mut axes = Vec::new();
    for axis in Axis::SPATIAL {
        let v = velocity.get(axis).unwrap_or(0.0);
        if v == 0.0 {
            continue;
        }
        let p = naive.get(axis).unwrap_or(0.0);
        let hi = max.get(axis).unwrap_or(f64::INFINITY);
        let lo = min.get(axis).unwrap_or(f64::NEG_INFINITY);
        let wall = if p > hi {
            hi
        } else if p < lo {
            lo
        } else {
            continue;
        };
        let t = ((wall - from.get(axis).unwrap_or(0.0)) / v).max(0.0);
        if (t - best).abs() < 1e-9 {
            axes.push(axis);
        } else if t < best {
            best = t;
            axes.clear();
            axes.push(axis);
        }
    }
    (best, axes)
}

/// What a finished move did.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub segments: usize,
    pub bounces: usize,
    pub start_position: Position,
    pub final_position: Position,
    /// xyz length actually covered, mm.
    pub distance: f64,
    /// mm/s
    pub speed: f64,
    pub filament: f64,
    pub move_time_ms: f64,
    pub unretracted: bool,
    pub retracted: bool,
}

/// Shortest decimal form, without a "-0".
pub(crate) fn coord(v: f64) -> String {
    if v == 0.0 { "0".to_string() } else { v.to_string() }
}

pub(crate) fn g1(position: &Position, speed: f64) -> String {
    format!(
        "G1 X{} Y{} Z{} E{} F{:.4}",
        coord(position.x()),
        coord(position.y()),
        coord(position.z()),
        coord(position.e()),
        speed * 60.0
    )
}

/// Execute a plan: unretract if needed, walk the segments, retract at the end.
pub async fn execute(
    state: &mut KinematicState,
    plan: &MovePlan,
    sink: &dyn InstructionSink,
) -> Result<ExecutionReport> {
    if plan.manual_extrusion && plan.filament.abs() > crate::motion::FILAMENT_EPSILON {
        // explicit filament overrides whatever was retracted
        state.retraction.current = 0.0;
    }
    let unretracted = if plan.should_retract {
        retraction::unretract(state, sink, None, None).await?
    } else {
        false
    };

    let mut report = ExecutionReport {
        segments: 0,
        bounces: 0,
        start_position: state.position(),
        final_position: state.position(),
        distance: 0.0,
        speed: plan.speed,
        filament: plan.filament,
        move_time_ms: 0.0,
        unretracted,
        retracted: false,
    };

    if plan.distance < MIN_MOVE {
        // filament-only (or sub-resolution) move: one instruction
        let (min, max) = state.envelope();
        let target = Position::xyze(
            plan.target.x(),
            plan.target.y(),
            plan.target.z(),
            state.position().e() + plan.filament,
        )
        .clamped(&min, &max)
        .rounded(COORD_DECIMALS);
        sink.send(&g1(&target, plan.speed)).await?;
        state.commit(target);
        state.add_move_time(plan.move_time_ms);
        report.segments = 1;
        report.move_time_ms = plan.move_time_ms;
    } else {
        let mut walk = SegmentedMove::new(plan, state.boundary_mode(), state.limits.max_move_per_cycle);
        let mut stalls = 0;
        loop {
            let from = state.position();
            let (min, max) = state.envelope();
            let Some(segment) = walk.step(&from, &min, &max) else {
                break;
            };
            if !segment.reflected.is_empty() {
                report.bounces += 1;
            }
            let v = walk.velocity();
            if v.x() != 0.0 || v.y() != 0.0 {
                state.set_heading(v.y().atan2(v.x()));
            }
            if segment.length <= f64::EPSILON {
                stalls += 1;
                if stalls > MAX_STALLS {
                    tracing::warn!("Move stuck at {} after {} reflections", from, stalls);
                    break;
                }
                continue;
            }
            stalls = 0;
            let position = segment.position.rounded(COORD_DECIMALS);
            sink.send(&g1(&position, plan.speed)).await?;
            state.commit(position);
            let ms = 1000.0 * segment.length / plan.speed;
            state.add_move_time(ms);
            report.move_time_ms += ms;
            report.distance += segment.length;
            report.segments += 1;
        }
    }

    if plan.should_retract {
        report.retracted = retraction::retract(state, sink, None, None).await?;
    }
    report.final_position = state.position();
    tracing::debug!(
        "Executed move to {} in {} segment(s), {} bounce(s)",
        report.final_position,
        report.segments,
        report.bounces
    );
    Ok(report)
}
