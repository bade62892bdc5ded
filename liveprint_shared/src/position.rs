// position.rs - Named-axis coordinate tuple used by all motion code
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine axis. `E` is the filament axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::E];
    pub const SPATIAL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::E => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::E => "e",
        }
    }

    pub fn from_name(name: &str) -> Option<Axis> {
        match name.to_ascii_lowercase().as_str() {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            "z" => Some(Axis::Z),
            "e" => Some(Axis::E),
            _ => None,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PositionError {
    #[error("axis sets differ: [{left}] vs [{right}]")]
    AxisMismatch { left: String, right: String },
    #[error("axis {0} is not defined in this position")]
    MissingAxis(Axis),
}

/// A mapping from axis to coordinate in millimetres.
///
/// Binary operations require both operands to define exactly the same axes,
/// so an axis can never drop out of a position as a side effect of arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Position {
    axes: [Option<f64>; 4],
}

impl Position {
    /// Position with no axes defined.
    pub fn empty() -> Self {
        Self { axes: [None; 4] }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self { axes: [Some(x), Some(y), Some(z), None] }
    }

    pub fn xyze(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { axes: [Some(x), Some(y), Some(z), Some(e)] }
    }

    pub fn get(&self, axis: Axis) -> Option<f64> {
        self.axes[axis.index()]
    }

    /// Coordinate of `axis`, failing when the axis is absent.
    pub fn require(&self, axis: Axis) -> Result<f64, PositionError> {
        self.get(axis).ok_or(PositionError::MissingAxis(axis))
    }

    /// Absent axes read as 0.0.
    pub fn x(&self) -> f64 {
        self.get(Axis::X).unwrap_or(0.0)
    }
    pub fn y(&self) -> f64 {
        self.get(Axis::Y).unwrap_or(0.0)
    }
    pub fn z(&self) -> f64 {
        self.get(Axis::Z).unwrap_or(0.0)
    }
    pub fn e(&self) -> f64 {
        self.get(Axis::E).unwrap_or(0.0)
    }

    /// Returns a copy with `axis` set to `value` (defining it if it was absent).
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.axes[axis.index()] = Some(value);
        self
    }

    /// Overwrite a coordinate that is already defined.
    pub fn set(&mut self, axis: Axis, value: f64) -> Result<(), PositionError> {
        match self.axes[axis.index()].as_mut() {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(PositionError::MissingAxis(axis)),
        }
    }

    pub fn has(&self, axis: Axis) -> bool {
        self.get(axis).is_some()
    }

    /// Defined axes and their values, in x, y, z, e order.
    pub fn axes(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        Axis::ALL
            .into_iter()
            .filter_map(move |axis| self.get(axis).map(|v| (axis, v)))
    }

    fn axis_set(&self) -> [bool; 4] {
        [
            self.axes[0].is_some(),
            self.axes[1].is_some(),
            self.axes[2].is_some(),
            self.axes[3].is_some(),
        ]
    }

    fn describe_axes(&self) -> String {
        self.axes().map(|(a, _)| a.name()).collect::<Vec<_>>().join(",")
    }

    fn zip_with(&self, other: &Position, op: impl Fn(f64, f64) -> f64) -> Result<Position, PositionError> {
        if self.axis_set() != other.axis_set() {
            return Err(PositionError::AxisMismatch {
                left: self.describe_axes(),
                right: other.describe_axes(),
            });
        }
        let mut out = Position::empty();
        for axis in Axis::ALL {
            if let (Some(a), Some(b)) = (self.get(axis), other.get(axis)) {
                out.axes[axis.index()] = Some(op(a, b));
            }
        }
        Ok(out)
    }

    pub fn add(&self, other: &Position) -> Result<Position, PositionError> {
        self.zip_with(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &Position) -> Result<Position, PositionError> {
        self.zip_with(other, |a, b| a - b)
    }

    pub fn scale(&self, amount: f64) -> Position {
        let mut out = *self;
        for slot in out.axes.iter_mut().flatten() {
            *slot *= amount;
        }
        out
    }

    pub fn div(&self, amount: f64) -> Position {
        self.scale(1.0 / amount)
    }

    pub fn mag_sq(&self) -> f64 {
        self.axes().map(|(_, v)| v * v).sum()
    }

    pub fn mag(&self) -> f64 {
        self.mag_sq().sqrt()
    }

    /// Copy holding only the x, y, z axes.
    pub fn spatial(&self) -> Position {
        let mut out = *self;
        out.axes[Axis::E.index()] = None;
        out
    }

    pub fn dist(&self, other: &Position) -> Result<f64, PositionError> {
        Ok(self.sub(other)?.mag())
    }

    /// Clamp every axis defined in `self` into `[min, max]`. Axes missing from
    /// the bounds are left untouched.
    pub fn clamped(&self, min: &Position, max: &Position) -> Position {
        let mut out = *self;
        for axis in Axis::ALL {
            if let Some(v) = out.axes[axis.index()] {
                let lo = min.get(axis).unwrap_or(f64::NEG_INFINITY);
                let hi = max.get(axis).unwrap_or(f64::INFINITY);
                out.axes[axis.index()] = Some(v.max(lo).min(hi));
            }
        }
        out
    }

    /// True when every defined axis lies within `[min - tolerance, max + tolerance]`.
    pub fn within(&self, min: &Position, max: &Position, tolerance: f64) -> bool {
        self.axes().all(|(axis, v)| {
            let lo = min.get(axis).unwrap_or(f64::NEG_INFINITY);
            let hi = max.get(axis).unwrap_or(f64::INFINITY);
            v >= lo - tolerance && v <= hi + tolerance
        })
    }

    /// Round every coordinate to `decimals` places.
    pub fn rounded(&self, decimals: i32) -> Position {
        let factor = 10f64.powi(decimals);
        let mut out = *self;
        for slot in out.axes.iter_mut().flatten() {
            *slot = (*slot * factor).round() / factor;
        }
        out
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.axes().map(|(a, v)| format!("{}:{:.4}", a, v)).collect();
        write!(f, "({})", parts.join(" "))
    }
}
