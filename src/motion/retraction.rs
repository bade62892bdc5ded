// src/motion/retraction.rs - Filament retraction, software or firmware driven
use liveprint_shared::Axis;

use crate::communication::InstructionSink;
use crate::config::{PrinterConfig, RetractionConfig};
use crate::error::{LiveError, Result};
use crate::motion::{KinematicState, MIN_RETRACTION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractionPhase {
    Extended,
    Retracted,
}

/// Retraction settings plus how much filament is currently pulled back.
#[derive(Debug, Clone, PartialEq)]
pub struct Retraction {
    pub length: f64,
    /// mm/s
    pub speed: f64,
    /// Filament currently retracted, mm. 0 when extended.
    pub current: f64,
    pub extra_unretract: f64,
    pub z_hop: f64,
    /// Use G10/G11 and let the firmware do the work.
    pub firmware: bool,
    /// Retract after every extruding move unless told otherwise.
    pub auto: bool,
    sent_settings: Option<(f64, f64)>,
}

impl Retraction {
    pub fn from_config(cfg: &RetractionConfig, printer: &PrinterConfig) -> Self {
        Self {
            length: cfg.length,
            speed: cfg.speed,
            current: 0.0,
            extra_unretract: cfg.extra_unretract,
            z_hop: cfg.z_hop,
            firmware: printer.firmware_retract,
            auto: printer.auto_retract,
            sent_settings: None,
        }
    }

    pub fn phase(&self) -> RetractionPhase {
        if self.current > 0.0 {
            RetractionPhase::Retracted
        } else {
            RetractionPhase::Extended
        }
    }

    pub fn is_retracted(&self) -> bool {
        self.phase() == RetractionPhase::Retracted
    }
}

fn check_retract_args(state: &KinematicState, length: f64, speed: f64) -> Result<()> {
    if length.is_nan() || length < 0.0 {
        return Err(LiveError::invalid(format!("bad retract length {}", length)));
    }
    let max = state.model().max_print_speed.e;
    if speed.is_nan() || speed <= 0.0 || speed > max {
        return Err(LiveError::invalid(format!(
            "retract speed {} must be in (0, {}]",
            speed, max
        )));
    }
    Ok(())
}

/// Push M207/M208 when the firmware is handling retraction and the
/// settings differ from what was last sent.
pub async fn send_firmware_settings(
    state: &mut KinematicState,
    sink: &dyn InstructionSink,
    length: f64,
    speed: f64,
) -> Result<()> {
    if state.retraction.sent_settings == Some((length, speed)) {
        return Ok(());
    }
    let feed = speed * 60.0;
    sink.send(&format!(
        "M207 S{:.3} F{:.1} Z{:.3}",
        length, feed, state.retraction.z_hop
    ))
    .await?;
    sink.send(&format!(
        "M208 S{:.3} F{:.1}",
        state.retraction.extra_unretract, feed
    ))
    .await?;
    state.retraction.sent_settings = Some((length, speed));
    Ok(())
}

/// Store an explicitly given length or speed as the new retraction
/// settings, after checking them.
fn adopt_settings(
    state: &mut KinematicState,
    length: Option<f64>,
    speed: Option<f64>,
    default_length: f64,
) -> Result<(f64, f64)> {
    let resolved = (
        length.unwrap_or(default_length),
        speed.unwrap_or(state.retraction.speed),
    );
    check_retract_args(state, resolved.0, resolved.1)?;
    if let Some(length) = length {
        state.retraction.length = length;
    }
    if let Some(speed) = speed {
        state.retraction.speed = speed;
    }
    Ok(resolved)
}

/// Pull filament back. Does nothing if already retracted.
///
/// A length or speed passed here replaces the stored setting. The filament
/// axis is moved back by `length` in both modes; only the instruction
/// differs. Returns whether anything was emitted.
pub async fn retract(
    state: &mut KinematicState,
    sink: &dyn InstructionSink,
    length: Option<f64>,
    speed: Option<f64>,
) -> Result<bool> {
    if state.retraction.is_retracted() {
        tracing::debug!("Already retracted, skipping retract");
        return Ok(false);
    }
    let stored = state.retraction.length;
    let (length, speed) = adopt_settings(state, length, speed, stored)?;

    let position = state.position();
    let e = round_e(position.e() - length);
    if state.retraction.firmware {
        send_firmware_settings(state, sink, length, speed).await?;
        sink.send("G10").await?;
    } else {
        sink.send(&format!("G1 E{:.4} F{:.4}", e, speed * 60.0)).await?;
    }
    state.commit(position.with(Axis::E, e));
    state.retraction.current = length;
    Ok(true)
}

/// Push the retracted filament back, plus any extra unretract. Does
/// nothing if there is nothing meaningful to undo.
pub async fn unretract(
    state: &mut KinematicState,
    sink: &dyn InstructionSink,
    length: Option<f64>,
    speed: Option<f64>,
) -> Result<bool> {
    if state.retraction.current < MIN_RETRACTION {
        tracing::debug!("Not retracted, skipping unretract");
        return Ok(false);
    }
    let current = state.retraction.current;
    let (length, speed) = adopt_settings(state, length, speed, current)?;

    let position = state.position();
    let e = round_e(position.e() + length + state.retraction.extra_unretract);
    if state.retraction.firmware {
        send_firmware_settings(state, sink, length, speed).await?;
        sink.send("G11").await?;
    } else {
        sink.send(&format!("G1 E{:.4} F{:.4}", e, speed * 60.0)).await?;
    }
    state.commit(position.with(Axis::E, e));
    state.retraction.current = 0.0;
    Ok(true)
}

fn round_e(e: f64) -> f64 {
    (e * 10_000.0).round() / 10_000.0
}
