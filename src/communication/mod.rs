// src/communication/mod.rs - Instruction output and device response parsing
pub mod responses;
pub mod sink;

pub use responses::{DeviceResponse, TemperatureReport, parse_response};
pub use sink::{ChannelSink, InstructionSink, RecordingSink, WriterSink};
