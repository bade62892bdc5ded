// liveprint_shared: leaf data types shared by the host, the CLI and the tests

pub mod position;
pub mod printer_model;

pub use position::{Axis, Position, PositionError};
pub use printer_model::{AxisLimits, PrinterModel};
