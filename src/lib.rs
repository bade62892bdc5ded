// liveprint_rs: live-coded printing engine (planner, executor, command queue, timed tasks)

pub mod commands;
pub mod communication;
pub mod config;
pub mod error;
pub mod motion;
pub mod printer;
pub mod scheduler;
pub mod session;

pub use commands::{Command, Operation, parse_line};
pub use config::{Config, load_config};
pub use error::{LiveError, Result, SafetyViolation};
pub use liveprint_shared::{Axis, Position, PrinterModel};
pub use printer::{PrintEvent, Printer, PrinterSnapshot, RelativeMove};
pub use session::{LiveSession, ResponseKind};
