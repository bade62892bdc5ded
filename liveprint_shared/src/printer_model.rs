// printer_model.rs - Static machine model table (bed size, speed limits, filament)
use crate::position::{Axis, Position};
use serde::Serialize;

/// Default print speed for every model, mm/s.
pub const DEFAULT_PRINT_SPEED: f64 = 50.0;
/// Thinnest extrusion the planner will accept, mm.
pub const MIN_LAYER_HEIGHT: f64 = 0.05;

/// Filament axis bounds. The filament axis is effectively unbounded.
const FILAMENT_MIN: f64 = -99999.0;
const FILAMENT_MAX: f64 = 999999.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisLimits {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

impl AxisLimits {
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
        }
    }
}

/// Read-only description of one machine model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrinterModel {
    pub id: &'static str,
    /// Bed size x, y, z in mm.
    pub bed_size: [f64; 3],
    pub max_print_speed: AxisLimits,
    pub max_travel_speed: AxisLimits,
    pub filament_diameter: f64,
    /// Firmware takes extrusion amounts in mm^3 instead of mm of filament.
    pub volumetric: bool,
    /// Hz per mm/s for x, y, z: the stepper pitch a given speed produces.
    pub note_scale: [f64; 3],
}

const ULTIMAKER_FAST: AxisLimits = AxisLimits { x: 250.0, y: 250.0, z: 150.0, e: 150.0 };
const ULTIMAKER_PLUS: AxisLimits = AxisLimits { x: 150.0, y: 150.0, z: 80.0, e: 45.0 };
const ULTIMAKER_NOTES: [f64; 3] = [47.069852, 47.069852, 160.0];
const TRAVEL: AxisLimits = AxisLimits { x: 300.0, y: 300.0, z: 80.0, e: 45.0 };

pub static MODELS: [PrinterModel; 5] = [
    PrinterModel {
        id: "UM2",
        bed_size: [223.0, 223.0, 205.0],
        max_print_speed: ULTIMAKER_FAST,
        max_travel_speed: TRAVEL,
        filament_diameter: 2.85,
        volumetric: false,
        note_scale: ULTIMAKER_NOTES,
    },
    PrinterModel {
        id: "UM2plus",
        bed_size: [223.0, 223.0, 205.0],
        max_print_speed: ULTIMAKER_PLUS,
        max_travel_speed: TRAVEL,
        filament_diameter: 2.85,
        volumetric: true,
        note_scale: ULTIMAKER_NOTES,
    },
    PrinterModel {
        id: "UM2plusExt",
        bed_size: [223.0, 223.0, 305.0],
        max_print_speed: ULTIMAKER_PLUS,
        max_travel_speed: TRAVEL,
        filament_diameter: 2.85,
        volumetric: true,
        note_scale: ULTIMAKER_NOTES,
    },
    PrinterModel {
        id: "UM3",
        bed_size: [223.0, 223.0, 205.0],
        max_print_speed: ULTIMAKER_PLUS,
        max_travel_speed: TRAVEL,
        filament_diameter: 2.85,
        volumetric: false,
        note_scale: ULTIMAKER_NOTES,
    },
    PrinterModel {
        id: "REP",
        bed_size: [150.0, 150.0, 80.0],
        max_print_speed: ULTIMAKER_FAST,
        max_travel_speed: TRAVEL,
        filament_diameter: 2.85,
        volumetric: false,
        note_scale: ULTIMAKER_NOTES,
    },
];

pub const DEFAULT_MODEL: &str = "UM2plus";

impl PrinterModel {
    pub fn lookup(id: &str) -> Option<&'static PrinterModel> {
        MODELS.iter().find(|m| m.id.eq_ignore_ascii_case(id))
    }

    pub fn default_model() -> &'static PrinterModel {
        // MODELS[1] is UM2plus
        &MODELS[1]
    }

    pub fn ids() -> impl Iterator<Item = &'static str> {
        MODELS.iter().map(|m| m.id)
    }

    pub fn min_position(&self) -> Position {
        Position::xyze(0.0, 0.0, 0.0, FILAMENT_MIN)
    }

    pub fn max_position(&self) -> Position {
        Position::xyze(self.bed_size[0], self.bed_size[1], self.bed_size[2], FILAMENT_MAX)
    }

    /// Cross-sectional area of the filament in mm^2.
    pub fn filament_area(&self) -> f64 {
        let r = self.filament_diameter / 2.0;
        std::f64::consts::PI * r * r
    }

    /// Speed in mm/s at which `axis` sounds MIDI note `note` (69 is A4 at
    /// 440 Hz). `None` for the filament axis.
    pub fn note_speed(&self, note: f64, axis: Axis) -> Option<f64> {
        let scale = match axis {
            Axis::X => self.note_scale[0],
            Axis::Y => self.note_scale[1],
            Axis::Z => self.note_scale[2],
            Axis::E => return None,
        };
        let frequency = 2f64.powf((note - 69.0) / 12.0) * 440.0;
        Some(frequency / scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(PrinterModel::lookup("um2PLUS").map(|m| m.id), Some("UM2plus"));
        assert!(PrinterModel::lookup("prusa").is_none());
    }

    #[test]
    fn test_default_model_envelope() {
        let model = PrinterModel::default_model();
        assert_eq!(model.id, DEFAULT_MODEL);
        assert_eq!(model.max_position().x(), 223.0);
        assert_eq!(model.min_position().z(), 0.0);
        assert!(model.volumetric);
    }

    #[test]
    fn test_note_speed_follows_pitch() {
        let model = PrinterModel::default_model();
        let a4 = model.note_speed(69.0, Axis::X).unwrap();
        assert!((a4 - 440.0 / 47.069852).abs() < 1e-9);
        let a5 = model.note_speed(81.0, Axis::X).unwrap();
        assert!((a5 - 2.0 * a4).abs() < 1e-9);
        assert!((model.note_speed(69.0, Axis::Z).unwrap() - 2.75).abs() < 1e-9);
        assert!(model.note_speed(69.0, Axis::E).is_none());
    }
}
