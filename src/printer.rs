// src/printer.rs - Printing session: kinematic state plus the instruction sink
use std::f64::consts::PI;
use std::sync::Arc;

use liveprint_shared::printer_model::{DEFAULT_PRINT_SPEED, MIN_LAYER_HEIGHT};
use liveprint_shared::{Axis, Position, PrinterModel};
use tokio::sync::broadcast;

use crate::communication::InstructionSink;
use crate::config::Config;
use crate::error::{LiveError, Result};
use crate::motion::executor::{self, coord};
use crate::motion::planner::{self, AbsoluteMove, MoveRequest, PolarMove};
use crate::motion::{BoundaryMode, ExecutionReport, FILAMENT_EPSILON, KinematicState, retraction};

const PRINT_EVENT_CAPACITY: usize = 256;
/// Filament pulled back by `pause` and pushed out again by `resume`, mm.
const PAUSE_FILAMENT: f64 = 16.0;
/// Head lift on `pause`, mm.
const PAUSE_LIFT: f64 = 3.0;
/// Most lines a single fill may draw.
const MAX_FILL_PASSES: f64 = 10_000.0;
/// Notes below this are rests.
const LOWEST_NOTE: f64 = 10.0;

/// Relative move. `e: None` extrudes automatically.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelativeMove {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub e: Option<f64>,
    pub speed: Option<f64>,
    pub retract: Option<bool>,
}

/// Read-only copy of the state, for display and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct PrinterSnapshot {
    pub model: &'static str,
    pub position: Position,
    /// Degrees.
    pub heading: f64,
    pub elevation: f64,
    pub print_speed: f64,
    pub travel_speed: f64,
    pub layer_height: f64,
    pub retracted: f64,
    pub boundary_mode: BoundaryMode,
    pub total_move_time_ms: f64,
}

/// Something the printer just did, published to print listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum PrintEvent {
    Extrude {
        start: Position,
        end: Position,
        /// mm/s
        speed: f64,
        /// xyz length, mm.
        length: f64,
        filament: f64,
        total_move_time_ms: f64,
        layer_height: f64,
    },
    Travel {
        start: Position,
        end: Position,
        speed: f64,
        length: f64,
        total_move_time_ms: f64,
    },
    Retract { length: f64, speed: f64 },
    Unretract { length: f64, speed: f64 },
}

/// MIDI note number from "60", "C4", "f#3" or "Bb5" (C4 is 60).
pub fn parse_note(text: &str) -> Result<f64> {
    let text = text.trim();
    if let Ok(note) = text.parse::<f64>() {
        return Ok(note);
    }
    let bad = || LiveError::invalid(format!("can't parse '{}' as a note", text));
    let mut chars = text.chars();
    let mut semitone: i32 = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(bad()),
    };
    let rest = chars.as_str();
    let rest = if let Some(r) = rest.strip_prefix('#') {
        semitone += 1;
        r
    } else if let Some(r) = rest.strip_prefix('b') {
        semitone -= 1;
        r
    } else {
        rest
    };
    let octave: i32 = rest.parse().map_err(|_| bad())?;
    Ok(f64::from(12 * (octave + 1) + semitone))
}

/// Parse "10b", "1/2b", "20ms", "1.5s" or a bare number of milliseconds.
pub fn parse_time(text: &str, bpm: f64) -> Result<f64> {
    let text = text.trim().to_ascii_lowercase();
    let bad = || LiveError::invalid(format!("can't parse '{}' as a time", text));
    if let Ok(ms) = text.parse::<f64>() {
        return Ok(ms);
    }
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1000.0)
    } else if let Some(n) = text.strip_suffix('b') {
        (n, 60000.0 / bpm)
    } else {
        return Err(bad());
    };
    let value = match number.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().map_err(|_| bad())?;
            let den: f64 = den.trim().parse().map_err(|_| bad())?;
            if den == 0.0 {
                return Err(bad());
            }
            num / den
        }
        None => number.trim().parse().map_err(|_| bad())?,
    };
    Ok(value * scale)
}

pub struct Printer {
    state: KinematicState,
    sink: Arc<dyn InstructionSink>,
    events: broadcast::Sender<PrintEvent>,
    /// Set by a rest note, used by the next `wait` without a time.
    pending_wait_ms: Option<f64>,
}

impl Printer {
    pub fn new(config: &Config, sink: Arc<dyn InstructionSink>) -> Result<Self> {
        let (events, _) = broadcast::channel(PRINT_EVENT_CAPACITY);
        Ok(Self {
            state: KinematicState::new(config)?,
            sink,
            events,
            pending_wait_ms: None,
        })
    }

    /// Listen to every move and retraction from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PrintEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PrintEvent) {
        tracing::trace!("Print event: {:?}", event);
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    fn publish_retraction(&self, retracted: bool) {
        let (length, speed) = (self.state.retraction.length, self.state.retraction.speed);
        self.publish(if retracted {
            PrintEvent::Retract { length, speed }
        } else {
            PrintEvent::Unretract { length, speed }
        });
    }

    fn publish_move(&self, report: &ExecutionReport) {
        if report.unretracted {
            self.publish_retraction(false);
        }
        if report.segments > 0 {
            let total_move_time_ms = self.state.total_move_time_ms();
            self.publish(if report.filament.abs() > FILAMENT_EPSILON {
                PrintEvent::Extrude {
                    start: report.start_position,
                    end: report.final_position,
                    speed: report.speed,
                    length: report.distance,
                    filament: report.filament,
                    total_move_time_ms,
                    layer_height: self.state.layer_height(),
                }
            } else {
                PrintEvent::Travel {
                    start: report.start_position,
                    end: report.final_position,
                    speed: report.speed,
                    length: report.distance,
                    total_move_time_ms,
                }
            });
        }
        if report.retracted {
            self.publish_retraction(true);
        }
    }

    pub fn state(&self) -> &KinematicState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut KinematicState {
        &mut self.state
    }

    pub fn snapshot(&self) -> PrinterSnapshot {
        PrinterSnapshot {
            model: self.state.model().id,
            position: self.state.position(),
            heading: self.state.heading().to_degrees(),
            elevation: self.state.elevation().to_degrees(),
            print_speed: self.state.print_speed(),
            travel_speed: self.state.travel_speed(),
            layer_height: self.state.layer_height(),
            retracted: self.state.retraction.current,
            boundary_mode: self.state.boundary_mode(),
            total_move_time_ms: self.state.total_move_time_ms(),
        }
    }

    /// Send a raw instruction.
    pub async fn gcode(&self, instruction: &str) -> Result<()> {
        self.sink.send(instruction.trim()).await
    }

    pub fn set_model(&mut self, id: &str) -> Result<()> {
        let model = PrinterModel::lookup(id)
            .ok_or_else(|| LiveError::invalid(format!("unknown printer model '{}'", id)))?;
        self.state.set_properties(model);
        Ok(())
    }

    /// Plan and run one move request.
    pub async fn execute(&mut self, request: MoveRequest) -> Result<Option<ExecutionReport>> {
        let Some(plan) = planner::plan(&self.state, &request)? else {
            return Ok(None);
        };
        let report = executor::execute(&mut self.state, &plan, self.sink.as_ref()).await?;
        self.publish_move(&report);
        Ok(Some(report))
    }

    /// Extrude to absolute coordinates. A speed given here becomes the
    /// print speed for later moves too.
    pub async fn extrude_to(&mut self, mut target: AbsoluteMove) -> Result<Option<ExecutionReport>> {
        if let Some(speed) = target.speed {
            target.speed = Some(self.state.set_print_speed(speed)?);
        }
        self.execute(MoveRequest::Absolute(target)).await
    }

    pub async fn extrude_by(&mut self, delta: RelativeMove) -> Result<Option<ExecutionReport>> {
        let p = self.state.position();
        let target = AbsoluteMove {
            x: Some(p.x() + delta.x.unwrap_or(0.0)),
            y: Some(p.y() + delta.y.unwrap_or(0.0)),
            z: Some(p.z() + delta.z.unwrap_or(0.0)),
            e: delta.e.map(|e| p.e() + e),
            speed: delta.speed,
            retract: delta.retract,
        };
        self.extrude_to(target).await
    }

    /// Travel to absolute coordinates without extruding. A speed given here
    /// becomes the travel speed.
    pub async fn move_to(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        speed: Option<f64>,
    ) -> Result<Option<ExecutionReport>> {
        let speed = match speed {
            Some(s) => self.state.set_travel_speed(s)?,
            None => self.state.travel_speed(),
        };
        self.travel_to(x, y, z, speed).await
    }

    async fn travel_to(
        &mut self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        speed: f64,
    ) -> Result<Option<ExecutionReport>> {
        let target = AbsoluteMove {
            x,
            y,
            z,
            e: Some(self.state.position().e()),
            speed: Some(speed),
            retract: None,
        };
        self.execute(MoveRequest::Absolute(target)).await
    }

    pub async fn move_by(
        &mut self,
        dx: f64,
        dy: f64,
        dz: f64,
        speed: Option<f64>,
    ) -> Result<Option<ExecutionReport>> {
        let p = self.state.position();
        self.move_to(Some(p.x() + dx), Some(p.y() + dy), Some(p.z() + dz), speed)
            .await
    }

    async fn polar(&mut self, distance: Option<f64>, extrude: bool) -> Result<Option<ExecutionReport>> {
        self.polar_at(distance, extrude, None).await
    }

    async fn polar_at(
        &mut self,
        distance: Option<f64>,
        extrude: bool,
        speed: Option<f64>,
    ) -> Result<Option<ExecutionReport>> {
        if let Some(d) = distance {
            self.state.set_distance(d);
        }
        let (heading, elevation, distance) = self.state.take_polar();
        if distance.abs() < f64::EPSILON {
            return Ok(None);
        }
        let request = PolarMove {
            heading,
            elevation,
            distance,
            extrude,
            speed,
            retract: None,
        };
        self.execute(MoveRequest::Polar(request)).await
    }

    /// Extrude along the current heading, by `distance` or the stored one.
    pub async fn draw(&mut self, distance: Option<f64>) -> Result<Option<ExecutionReport>> {
        self.polar(distance, true).await
    }

    pub async fn travel(&mut self, distance: Option<f64>) -> Result<Option<ExecutionReport>> {
        self.polar(distance, false).await
    }

    /// Extrude along the current heading for a time (any `parse_time`
    /// notation) at the print speed.
    pub async fn draw_time(&mut self, time: &str) -> Result<Option<ExecutionReport>> {
        let distance = self.distance_for(time, self.state.print_speed())?;
        self.draw(Some(distance)).await
    }

    /// Travel along the current heading for a time at the travel speed.
    pub async fn travel_time(&mut self, time: &str) -> Result<Option<ExecutionReport>> {
        let distance = self.distance_for(time, self.state.travel_speed())?;
        self.travel(Some(distance)).await
    }

    fn distance_for(&self, time: &str, speed: f64) -> Result<f64> {
        let ms = parse_time(time, self.state.bpm())?;
        if !(ms >= 0.0) {
            return Err(LiveError::invalid(format!("bad move time {}", time)));
        }
        Ok(speed * ms / 1000.0)
    }

    /// Extrude straight up by `distance`, at most as fast as z may print.
    pub async fn draw_up(&mut self, distance: f64) -> Result<Option<ExecutionReport>> {
        self.state.set_elevation(90.0);
        let speed = self
            .state
            .print_speed()
            .min(self.state.model().max_print_speed.z);
        self.polar_at(Some(distance), true, Some(speed)).await
    }

    pub async fn draw_down(&mut self, distance: f64) -> Result<Option<ExecutionReport>> {
        self.draw_up(-distance).await
    }

    /// Vertical travel at travel speed, held to what the z axis allows.
    fn vertical_speed(&self) -> f64 {
        self.state
            .travel_speed()
            .min(self.state.model().max_travel_speed.z)
    }

    pub async fn up(&mut self, z: f64) -> Result<Option<ExecutionReport>> {
        let z = self.state.position().z() + z;
        let speed = self.vertical_speed();
        self.travel_to(None, None, Some(z), speed).await
    }

    pub async fn down(&mut self, z: f64) -> Result<Option<ExecutionReport>> {
        self.up(-z).await
    }

    pub async fn up_to(&mut self, z: f64) -> Result<Option<ExecutionReport>> {
        let speed = self.vertical_speed();
        self.travel_to(None, None, Some(z), speed).await
    }

    pub fn turn(&mut self, degrees: f64) {
        self.state.turn(degrees);
    }

    pub fn turn_to(&mut self, degrees: f64) {
        self.state.turn_to(degrees);
    }

    pub fn elevation(&mut self, degrees: f64) {
        self.state.set_elevation(degrees);
    }

    pub fn distance(&mut self, distance: f64) {
        self.state.set_distance(distance);
    }

    /// Aim at a point: sets heading, elevation and distance without moving.
    /// With a time, speed is set so the move takes that long.
    pub fn to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>, time: Option<&str>) -> Result<()> {
        let p = self.state.position();
        let dx = x.unwrap_or(p.x()) - p.x();
        let dy = y.unwrap_or(p.y()) - p.y();
        let dz = z.unwrap_or(p.z()) - p.z();
        let distance = (dx * dx + dy * dy + dz * dz).sqrt();
        if distance < 1e-5 {
            self.state.set_distance(0.0);
            self.state.set_elevation(0.0);
            return Ok(());
        }
        self.state.set_heading(dy.atan2(dx));
        self.state.set_elevation(dz.atan2(dx.hypot(dy)).to_degrees());
        self.state.set_distance(distance);
        if let Some(time) = time {
            let ms = parse_time(time, self.state.bpm())?;
            self.speed(1000.0 * distance / ms)?;
        }
        Ok(())
    }

    /// Set print and travel speed together.
    pub fn speed(&mut self, speed: f64) -> Result<f64> {
        let travel = self.state.set_travel_speed(speed)?;
        self.state.set_print_speed(travel)
    }

    /// Speed at which moving along `axis` plays `note` on this machine.
    pub fn midi_to_speed(&self, note: f64, axis: Axis) -> Result<f64> {
        self.state
            .model()
            .note_speed(note, axis)
            .ok_or_else(|| LiveError::invalid(format!("no note speed for axis {}", axis)))
    }

    /// Set print and travel speed so moves along `axis` play `note`.
    pub fn note_speed(&mut self, note: f64, axis: Axis) -> Result<f64> {
        let speed = self.midi_to_speed(note, axis)?;
        self.speed(speed)
    }

    /// Aim the next move so it plays `note` for `time_ms` on the given axes
    /// ("x", "xy", "z", ...). X reverses its direction on every note, y and
    /// z keep theirs. Notes below 10 are rests: they set the next wait.
    pub fn note(&mut self, note: f64, time_ms: f64, axes: &str) -> Result<()> {
        if !(time_ms >= 0.0) {
            return Err(LiveError::invalid(format!("bad note length {}", time_ms)));
        }
        if note < LOWEST_NOTE {
            self.pending_wait_ms = Some(time_ms);
            self.state.set_distance(0.0);
            return Ok(());
        }
        let heading = {
            let h = self.state.heading();
            h.sin().atan2(h.cos())
        };
        let rising = self.state.elevation() > 0.0;
        let (mut dx, mut dy, mut dz) = (0.0, 0.0, 0.0);
        let mut total = 0.0;
        for name in axes.chars() {
            let axis = Axis::from_name(&name.to_string())
                .filter(|a| *a != Axis::E)
                .ok_or_else(|| LiveError::invalid(format!("bad note axis '{}'", name)))?;
            let speed = self.midi_to_speed(note, axis)?;
            total += speed * speed;
            match axis {
                Axis::X => dx = if heading.abs() < PI / 2.0 { -1.0 } else { 1.0 },
                Axis::Y => dy = if heading > 0.0 && heading < PI { 1.0 } else { -1.0 },
                _ => dz = if rising { 90.0 } else { -90.0 },
            }
        }
        if total == 0.0 {
            return Err(LiveError::invalid("note needs at least one axis"));
        }
        self.state.set_heading(f64::atan2(dy, dx));
        self.state.set_elevation(dz);
        let speed = self.speed(total.sqrt())?;
        self.state.set_distance(speed * time_ms / 1000.0);
        Ok(())
    }

    /// Regular polygon starting at the current point, drawn without
    /// retracting between sides.
    pub async fn polygon(&mut self, radius: f64, segments: u32) -> Result<()> {
        if segments < 3 || !(radius > 0.0) {
            return Err(LiveError::invalid(format!(
                "polygon needs radius > 0 and at least 3 segments, got {} / {}",
                radius, segments
            )));
        }
        let r2x2 = radius * radius * 2.0;
        let angle = 2.0 * PI / f64::from(segments);
        let side = (r2x2 - r2x2 * angle.cos()).sqrt();
        let auto = self.state.retraction.auto;
        self.state.retraction.auto = false;
        let mut result = Ok(());
        for _ in 0..segments {
            self.state.set_heading(self.state.heading() + angle);
            if let Err(err) = self.draw(Some(side)).await {
                result = Err(err);
                break;
            }
        }
        self.state.retraction.auto = auto;
        result?;
        if auto {
            self.retract(None, None).await?;
        }
        Ok(())
    }

    /// Rectangle from the current point, then retract and travel one side on.
    pub async fn rect(&mut self, width: f64, height: f64) -> Result<()> {
        let auto = self.state.retraction.auto;
        self.state.retraction.auto = false;
        let mut result = Ok(());
        'sides: for _ in 0..2 {
            for side in [width, height] {
                if let Err(err) = self.draw(Some(side)).await {
                    result = Err(err);
                    break 'sides;
                }
                self.turn(90.0);
            }
        }
        self.state.retraction.auto = auto;
        result?;
        self.retract(None, None).await?;
        self.travel(Some(width)).await?;
        Ok(())
    }

    /// Fill a `width` x `height` area with lines parallel to the heading,
    /// `gap` apart (1.5 layer heights by default), with one retract at the end.
    pub async fn draw_fill(&mut self, width: f64, height: f64, gap: Option<f64>) -> Result<()> {
        let gap = gap
            .unwrap_or(1.5 * self.state.layer_height())
            .max(MIN_LAYER_HEIGHT);
        if !(width > 0.0) || !(height > 0.0) {
            return Err(LiveError::invalid(format!(
                "fill needs a positive area, got {} x {}",
                width, height
            )));
        }
        let auto = std::mem::replace(&mut self.state.retraction.auto, false);
        let result = self.fill_passes(width, height, gap).await;
        self.state.retraction.auto = auto;
        result?;
        if auto {
            self.retract(None, None).await?;
        }
        Ok(())
    }

    async fn fill_passes(&mut self, width: f64, height: f64, gap: f64) -> Result<()> {
        let passes = width / gap;
        if passes > MAX_FILL_PASSES {
            return Err(LiveError::invalid(format!("fill would need {:.0} passes", passes)));
        }
        if passes < 3.0 {
            self.draw(Some(height)).await?;
            return Ok(());
        }
        let mut passes = passes.ceil() as u32;
        // even, so the head ends on the side it started
        if passes % 2 != 0 {
            passes += 1;
        }
        for i in 0..passes {
            let turn = if i % 2 == 0 { -90.0 } else { 90.0 };
            self.draw(Some(height)).await?;
            self.turn(turn);
            self.draw(Some(gap)).await?;
            self.turn(turn);
        }
        self.turn(180.0);
        Ok(())
    }

    /// Fill along x: travel one line spacing in y, then extrude across,
    /// alternating direction until `height` is covered.
    pub async fn fill(&mut self, width: f64, height: f64, layer_height: Option<f64>) -> Result<()> {
        let spacing = layer_height
            .unwrap_or(self.state.layer_height())
            .max(MIN_LAYER_HEIGHT)
            * PI;
        if !(width > 0.0) || !(height > 0.0) {
            return Err(LiveError::invalid(format!(
                "fill needs a positive area, got {} x {}",
                width, height
            )));
        }
        if height / spacing > MAX_FILL_PASSES {
            return Err(LiveError::invalid(format!(
                "fill would need {:.0} passes",
                height / spacing
            )));
        }
        let mut covered = 0.0;
        let mut direction = 1.0;
        while covered < height {
            self.move_by(0.0, spacing, 0.0, None).await?;
            self.extrude_by(RelativeMove {
                x: Some(direction * width),
                ..Default::default()
            })
            .await?;
            direction = -direction;
            covered += spacing;
        }
        Ok(())
    }

    pub async fn retract(&mut self, length: Option<f64>, speed: Option<f64>) -> Result<bool> {
        let emitted = retraction::retract(&mut self.state, self.sink.as_ref(), length, speed).await?;
        if emitted {
            self.publish_retraction(true);
        }
        Ok(emitted)
    }

    pub async fn unretract(&mut self, length: Option<f64>, speed: Option<f64>) -> Result<bool> {
        let emitted = retraction::unretract(&mut self.state, self.sink.as_ref(), length, speed).await?;
        if emitted {
            self.publish_retraction(false);
        }
        Ok(emitted)
    }

    /// Hand retraction to the firmware (G10/G11) or take it back.
    pub async fn fw_retract(&mut self, enabled: bool) -> Result<()> {
        self.state.retraction.firmware = enabled;
        // M209 S1 makes the firmware guess retracts from E-only moves
        let auto_detect = if enabled { 0 } else { 1 };
        self.sink.send(&format!("M209 S{}", auto_detect)).await
    }

    pub fn auto_retract(&mut self, enabled: bool) {
        self.state.retraction.auto = enabled;
    }

    /// Set retraction speed in mm/s, pushing it to the firmware when it
    /// handles retraction.
    pub async fn retract_speed(&mut self, speed: f64) -> Result<()> {
        let max = self.state.model().max_print_speed.e;
        if speed.is_nan() || speed <= 0.0 || speed > max {
            return Err(LiveError::invalid(format!(
                "retract speed {} must be in (0, {}]",
                speed, max
            )));
        }
        self.state.retraction.speed = speed;
        if self.state.retraction.firmware {
            let length = self.state.retraction.length;
            retraction::send_firmware_settings(&mut self.state, self.sink.as_ref(), length, speed)
                .await?;
        }
        Ok(())
    }

    /// Home, start heating and reset the session to the homed position.
    pub async fn start(&mut self, hotend: f64, bed: f64) -> Result<()> {
        self.gcode("G28").await?;
        self.gcode("M114").await?;
        self.gcode("M106 S0").await?;
        self.gcode(&format!("M104 S{}", coord(hotend))).await?;
        self.gcode(&format!("M140 S{}", coord(bed))).await?;
        if self.state.retraction.firmware {
            let (length, speed) = (self.state.retraction.length, self.state.retraction.speed);
            retraction::send_firmware_settings(&mut self.state, self.sink.as_ref(), length, speed)
                .await?;
        }
        let (_, max) = self.state.envelope();
        self.state
            .set_position(Position::xyze(0.0, max.y(), max.z(), 0.0))?;
        self.state.retraction.current = 0.0;
        self.state.reset_move_time();
        self.state.set_print_speed(DEFAULT_PRINT_SPEED)?;
        self.state.set_travel_speed(DEFAULT_PRINT_SPEED)?;
        self.sync().await
    }

    pub async fn temp(&self, celsius: f64) -> Result<()> {
        self.gcode(&format!("M104 S{}", coord(celsius))).await
    }

    /// Set hot end temperature and block until it is reached.
    pub async fn temp_wait(&self, celsius: f64) -> Result<()> {
        self.gcode(&format!("M109 S{}", coord(celsius))).await
    }

    pub async fn bed(&self, celsius: f64) -> Result<()> {
        self.gcode(&format!("M140 S{}", coord(celsius))).await
    }

    pub async fn fan(&self, speed: f64) -> Result<()> {
        self.gcode(&format!("M106 S{}", coord(speed))).await
    }

    /// Dwell for a time given in any notation `parse_time` accepts. Without
    /// a time, dwell for the last rest note (or not at all).
    pub async fn wait(&mut self, time: Option<&str>) -> Result<()> {
        let ms = match time {
            Some(time) => parse_time(time, self.state.bpm())?,
            None => self.pending_wait_ms.unwrap_or(0.0),
        };
        if !(ms >= 0.0) {
            return Err(LiveError::invalid(format!("negative wait {}", ms)));
        }
        self.pending_wait_ms = None;
        self.gcode(&format!("G4 P{}", ms.round())).await
    }

    /// Pull the filament back, lift the head and switch off heater and fan.
    pub async fn pause(&mut self) -> Result<()> {
        self.shift_filament(-PAUSE_FILAMENT).await?;
        self.up(PAUSE_LIFT).await?;
        self.gcode("M104 S0").await?;
        self.gcode("M107").await
    }

    /// Heat up (waiting for it), fan on, and push the filament back out.
    pub async fn resume(&mut self, hotend: f64) -> Result<()> {
        self.temp_wait(hotend).await?;
        self.fan(100.0).await?;
        self.shift_filament(PAUSE_FILAMENT).await.map(drop)
    }

    /// Filament-only move at the fastest feed the model allows.
    async fn shift_filament(&mut self, amount: f64) -> Result<Option<ExecutionReport>> {
        let target = AbsoluteMove {
            e: Some(self.state.position().e() + amount),
            speed: Some(self.state.model().max_print_speed.e),
            retract: Some(false),
            ..Default::default()
        };
        self.execute(MoveRequest::Absolute(target)).await
    }

    /// Ask for temperature and position.
    pub async fn sync(&self) -> Result<()> {
        self.gcode("M105").await?;
        self.gcode("M114").await
    }

    pub fn sync_position(&mut self, reported: &Position) {
        self.state.sync_position(reported);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_notations() {
        assert_eq!(parse_time("250", 120.0).unwrap(), 250.0);
        assert_eq!(parse_time("20ms", 120.0).unwrap(), 20.0);
        assert_eq!(parse_time("1.5s", 120.0).unwrap(), 1500.0);
        assert_eq!(parse_time("2b", 120.0).unwrap(), 1000.0);
        assert_eq!(parse_time("1/2b", 120.0).unwrap(), 250.0);
        assert!(parse_time("soon", 120.0).is_err());
        assert!(parse_time("1/0b", 120.0).is_err());
    }

    #[test]
    fn test_parse_note_names() {
        assert_eq!(parse_note("69").unwrap(), 69.0);
        assert_eq!(parse_note("A4").unwrap(), 69.0);
        assert_eq!(parse_note("c4").unwrap(), 60.0);
        assert_eq!(parse_note("Bb3").unwrap(), 58.0);
        assert_eq!(parse_note("F#2").unwrap(), 42.0);
        assert_eq!(parse_note("C-1").unwrap(), 0.0);
        assert!(parse_note("H2").is_err());
        assert!(parse_note("C").is_err());
    }
}
