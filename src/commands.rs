// src/commands.rs - Operation names, their aliases, and the line-oriented command parser
use std::collections::HashMap;
use std::str::FromStr;

use liveprint_shared::Axis;

use crate::error::{LiveError, Result};
use crate::motion::BoundaryMode;
use crate::motion::planner::AbsoluteMove;
use crate::printer::{Printer, RelativeMove, parse_note, parse_time};

/// Canonical operations. Every alias resolves to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Draw,
    Travel,
    ExtrudeBy,
    ExtrudeTo,
    MoveBy,
    MoveTo,
    Up,
    Down,
    UpTo,
    Turn,
    TurnTo,
    Elevation,
    Distance,
    To,
    Polygon,
    Rect,
    Retract,
    Unretract,
    FwRetract,
    AutoRetract,
    RetractSpeed,
    PrintSpeed,
    TravelSpeed,
    Speed,
    Thick,
    Start,
    Temp,
    TempWait,
    Bed,
    Fan,
    Wait,
    Sync,
    Gcode,
    Model,
    Boundary,
    Bpm,
    DrawTime,
    TravelTime,
    DrawUp,
    DrawDown,
    Fill,
    DrawFill,
    Pause,
    Resume,
    Note,
    NoteSpeed,
}

const ALIASES: &[(&str, Operation)] = &[
    ("draw", Operation::Draw),
    ("dr", Operation::Draw),
    ("travel", Operation::Travel),
    ("tr", Operation::Travel),
    ("extrude", Operation::ExtrudeBy),
    ("ext", Operation::ExtrudeBy),
    ("extrudeto", Operation::ExtrudeTo),
    ("ext2", Operation::ExtrudeTo),
    ("move", Operation::MoveBy),
    ("mov", Operation::MoveBy),
    ("moveto", Operation::MoveTo),
    ("mov2", Operation::MoveTo),
    ("up", Operation::Up),
    ("down", Operation::Down),
    ("upto", Operation::UpTo),
    ("downto", Operation::UpTo),
    ("turn", Operation::Turn),
    ("tur", Operation::Turn),
    ("turnto", Operation::TurnTo),
    ("tur2", Operation::TurnTo),
    ("elevation", Operation::Elevation),
    ("elev", Operation::Elevation),
    ("tilt", Operation::Elevation),
    ("distance", Operation::Distance),
    ("dist", Operation::Distance),
    ("to", Operation::To),
    ("polygon", Operation::Polygon),
    ("rect", Operation::Rect),
    ("retract", Operation::Retract),
    ("ret", Operation::Retract),
    ("unretract", Operation::Unretract),
    ("unret", Operation::Unretract),
    ("fwretract", Operation::FwRetract),
    ("autoretract", Operation::AutoRetract),
    ("retractspeed", Operation::RetractSpeed),
    ("printspeed", Operation::PrintSpeed),
    ("psp", Operation::PrintSpeed),
    ("drawspeed", Operation::PrintSpeed),
    ("dsp", Operation::PrintSpeed),
    ("travelspeed", Operation::TravelSpeed),
    ("tsp", Operation::TravelSpeed),
    ("speed", Operation::Speed),
    ("thick", Operation::Thick),
    ("lh", Operation::Thick),
    ("start", Operation::Start),
    ("temp", Operation::Temp),
    ("tempwait", Operation::TempWait),
    ("bed", Operation::Bed),
    ("fan", Operation::Fan),
    ("wait", Operation::Wait),
    ("sync", Operation::Sync),
    ("gcode", Operation::Gcode),
    ("gc", Operation::Gcode),
    ("model", Operation::Model),
    ("boundary", Operation::Boundary),
    ("bpm", Operation::Bpm),
    ("drawtime", Operation::DrawTime),
    ("dt", Operation::DrawTime),
    ("traveltime", Operation::TravelTime),
    ("tt", Operation::TravelTime),
    ("drawup", Operation::DrawUp),
    ("dup", Operation::DrawUp),
    ("drawdown", Operation::DrawDown),
    ("dd", Operation::DrawDown),
    ("fill", Operation::Fill),
    ("drawfill", Operation::DrawFill),
    ("pause", Operation::Pause),
    ("resume", Operation::Resume),
    ("note", Operation::Note),
    ("m2s", Operation::NoteSpeed),
    ("midi2speed", Operation::NoteSpeed),
];

impl Operation {
    /// Look up an operation by any of its names, case-insensitively.
    pub fn resolve(name: &str) -> Option<Operation> {
        let name = name.to_ascii_lowercase();
        ALIASES.iter().find(|(alias, _)| *alias == name).map(|(_, op)| *op)
    }

    pub fn aliases(self) -> impl Iterator<Item = &'static str> {
        ALIASES.iter().filter(move |(_, op)| *op == self).map(|(alias, _)| *alias)
    }
}

/// A fully resolved call on the printer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Draw(Option<f64>),
    Travel(Option<f64>),
    ExtrudeBy(RelativeMove),
    ExtrudeTo(AbsoluteMove),
    MoveBy { x: f64, y: f64, z: f64, speed: Option<f64> },
    MoveTo { x: Option<f64>, y: Option<f64>, z: Option<f64>, speed: Option<f64> },
    Up(f64),
    Down(f64),
    UpTo(f64),
    Turn(f64),
    TurnTo(f64),
    Elevation(f64),
    Distance(f64),
    To { x: Option<f64>, y: Option<f64>, z: Option<f64>, time: Option<String> },
    Polygon { radius: f64, segments: u32 },
    Rect { width: f64, height: f64 },
    Retract { length: Option<f64>, speed: Option<f64> },
    Unretract { length: Option<f64>, speed: Option<f64> },
    FwRetract(bool),
    AutoRetract(bool),
    RetractSpeed(f64),
    PrintSpeed(f64),
    TravelSpeed(f64),
    Speed(f64),
    Thick(f64),
    Start { hotend: f64, bed: f64 },
    Temp(f64),
    TempWait(f64),
    Bed(f64),
    Fan(f64),
    Wait(Option<String>),
    Sync,
    Gcode(String),
    Model(String),
    Boundary(BoundaryMode),
    Bpm(f64),
    DrawTime(String),
    TravelTime(String),
    DrawUp(f64),
    DrawDown(f64),
    Fill { width: f64, height: f64, layer_height: Option<f64> },
    DrawFill { width: f64, height: f64, gap: Option<f64> },
    Pause,
    Resume { hotend: f64 },
    /// `time` in any `parse_time` notation, resolved at the session bpm.
    Note { note: f64, time: String, axes: String },
    NoteSpeed { note: f64, axis: Axis },
}

/// Positional and `key=value` arguments following an operation name.
#[derive(Debug, Default)]
struct Args<'a> {
    positional: Vec<&'a str>,
    named: HashMap<String, &'a str>,
}

impl<'a> Args<'a> {
    fn parse(tokens: impl Iterator<Item = &'a str>) -> Self {
        let mut args = Args::default();
        for token in tokens {
            match token.split_once('=') {
                Some((key, value)) => {
                    args.named.insert(key.to_ascii_lowercase(), value);
                }
                None => args.positional.push(token),
            }
        }
        args
    }

    fn raw(&self, key: &str, index: usize) -> Option<&'a str> {
        self.named
            .get(key)
            .copied()
            .or_else(|| self.positional.get(index).copied())
    }

    fn number(&self, key: &str, index: usize) -> Result<Option<f64>> {
        self.raw(key, index)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| LiveError::invalid(format!("'{}' is not a number for {}", v, key)))
            })
            .transpose()
    }

    fn named_number(&self, key: &str) -> Result<Option<f64>> {
        self.named
            .get(key)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| LiveError::invalid(format!("'{}' is not a number for {}", v, key)))
            })
            .transpose()
    }

    fn required(&self, key: &str, index: usize) -> Result<f64> {
        self.number(key, index)?
            .ok_or_else(|| LiveError::invalid(format!("missing argument '{}'", key)))
    }

    fn flag(&self, key: &str, index: usize) -> Result<Option<bool>> {
        self.raw(key, index)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Ok(true),
                "0" | "false" | "off" | "no" => Ok(false),
                other => Err(LiveError::invalid(format!("'{}' is not a flag", other))),
            })
            .transpose()
    }
}

fn axis_arg(name: &str) -> Result<Axis> {
    Axis::from_name(name)
        .filter(|axis| *axis != Axis::E)
        .ok_or_else(|| LiveError::invalid(format!("'{}' is not x, y or z", name)))
}

/// Parse one input line. Blank lines and `;` / `#` comments give `None`.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
        return Ok(None);
    }
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let op = Operation::resolve(name)
        .ok_or_else(|| LiveError::invalid(format!("unknown operation '{}'", name)))?;
    if op == Operation::Gcode {
        if rest.is_empty() {
            return Err(LiveError::invalid("gcode needs an instruction"));
        }
        return Ok(Some(Command::Gcode(rest.to_string())));
    }
    let args = Args::parse(rest.split_whitespace());
    build(op, &args).map(Some)
}

fn build(op: Operation, args: &Args<'_>) -> Result<Command> {
    let command = match op {
        Operation::Draw => Command::Draw(args.number("d", 0)?),
        Operation::Travel => Command::Travel(args.number("d", 0)?),
        Operation::ExtrudeBy => Command::ExtrudeBy(RelativeMove {
            x: args.number("x", 0)?,
            y: args.number("y", 1)?,
            z: args.number("z", 2)?,
            e: args.named_number("e")?,
            speed: args.named_number("speed")?,
            retract: args.flag("retract", usize::MAX)?,
        }),
        Operation::ExtrudeTo => Command::ExtrudeTo(AbsoluteMove {
            x: args.number("x", 0)?,
            y: args.number("y", 1)?,
            z: args.number("z", 2)?,
            e: args.named_number("e")?,
            speed: args.named_number("speed")?,
            retract: args.flag("retract", usize::MAX)?,
        }),
        Operation::MoveBy => Command::MoveBy {
            x: args.number("x", 0)?.unwrap_or(0.0),
            y: args.number("y", 1)?.unwrap_or(0.0),
            z: args.number("z", 2)?.unwrap_or(0.0),
            speed: args.named_number("speed")?,
        },
        Operation::MoveTo => Command::MoveTo {
            x: args.number("x", 0)?,
            y: args.number("y", 1)?,
            z: args.number("z", 2)?,
            speed: args.named_number("speed")?,
        },
        Operation::Up => Command::Up(args.required("z", 0)?),
        Operation::Down => Command::Down(args.required("z", 0)?),
        Operation::UpTo => Command::UpTo(args.required("z", 0)?),
        Operation::Turn => Command::Turn(args.required("angle", 0)?),
        Operation::TurnTo => Command::TurnTo(args.required("angle", 0)?),
        Operation::Elevation => Command::Elevation(args.required("angle", 0)?),
        Operation::Distance => Command::Distance(args.required("d", 0)?),
        Operation::To => Command::To {
            x: args.number("x", 0)?,
            y: args.number("y", 1)?,
            z: args.number("z", 2)?,
            time: args.raw("t", 3).map(str::to_string),
        },
        Operation::Polygon => {
            let segments = args.number("segs", 1)?.unwrap_or(10.0);
            if segments.fract() != 0.0 || segments < 3.0 || segments > f64::from(u16::MAX) {
                return Err(LiveError::invalid(format!("bad segment count {}", segments)));
            }
            Command::Polygon {
                radius: args.required("r", 0)?,
                segments: segments as u32,
            }
        }
        Operation::Rect => {
            let width = args.number("w", 0)?;
            let height = args.number("h", 1)?;
            match (width, height) {
                (None, None) => return Err(LiveError::invalid("rect needs w or h")),
                (w, h) => Command::Rect {
                    width: w.or(h).unwrap_or_default(),
                    height: h.or(w).unwrap_or_default(),
                },
            }
        }
        Operation::Retract => Command::Retract {
            length: args.number("len", 0)?,
            speed: args.number("speed", 1)?,
        },
        Operation::Unretract => Command::Unretract {
            length: args.number("len", 0)?,
            speed: args.number("speed", 1)?,
        },
        Operation::FwRetract => Command::FwRetract(args.flag("on", 0)?.unwrap_or(true)),
        Operation::AutoRetract => Command::AutoRetract(args.flag("on", 0)?.unwrap_or(true)),
        Operation::RetractSpeed => Command::RetractSpeed(args.required("speed", 0)?),
        Operation::PrintSpeed => Command::PrintSpeed(args.required("speed", 0)?),
        Operation::TravelSpeed => Command::TravelSpeed(args.required("speed", 0)?),
        Operation::Speed => Command::Speed(args.required("speed", 0)?),
        Operation::Thick => Command::Thick(args.required("h", 0)?),
        Operation::Start => Command::Start {
            hotend: args.number("temp", 0)?.unwrap_or(190.0),
            bed: args.number("bed", 1)?.unwrap_or(50.0),
        },
        Operation::Temp => Command::Temp(args.number("temp", 0)?.unwrap_or(190.0)),
        Operation::TempWait => Command::TempWait(args.number("temp", 0)?.unwrap_or(190.0)),
        Operation::Bed => Command::Bed(args.number("temp", 0)?.unwrap_or(50.0)),
        Operation::Fan => Command::Fan(args.number("speed", 0)?.unwrap_or(100.0)),
        Operation::Wait => Command::Wait(args.raw("t", 0).map(str::to_string)),
        Operation::Sync => Command::Sync,
        Operation::Gcode => return Err(LiveError::invalid("gcode needs an instruction")),
        Operation::Model => Command::Model(
            args.raw("id", 0)
                .ok_or_else(|| LiveError::invalid("model needs an id"))?
                .to_string(),
        ),
        Operation::Boundary => Command::Boundary(BoundaryMode::from_str(
            args.raw("mode", 0)
                .ok_or_else(|| LiveError::invalid("boundary needs clamp or bounce"))?,
        )?),
        Operation::Bpm => Command::Bpm(args.required("bpm", 0)?),
        Operation::DrawTime | Operation::TravelTime => {
            let time = args
                .raw("t", 0)
                .ok_or_else(|| LiveError::invalid("timed move needs a time"))?
                .to_string();
            if op == Operation::DrawTime {
                Command::DrawTime(time)
            } else {
                Command::TravelTime(time)
            }
        }
        Operation::DrawUp => Command::DrawUp(args.required("d", 0)?),
        Operation::DrawDown => Command::DrawDown(args.required("d", 0)?),
        Operation::Fill => Command::Fill {
            width: args.required("w", 0)?,
            height: args.required("h", 1)?,
            layer_height: args.number("lh", 2)?,
        },
        Operation::DrawFill => Command::DrawFill {
            width: args.required("w", 0)?,
            height: args.required("h", 1)?,
            gap: args.number("gap", 2)?,
        },
        Operation::Pause => Command::Pause,
        Operation::Resume => Command::Resume {
            hotend: args.number("temp", 0)?.unwrap_or(190.0),
        },
        Operation::Note => Command::Note {
            note: args.raw("note", 0).map(parse_note).transpose()?.unwrap_or(40.0),
            time: args.raw("t", 1).unwrap_or("200").to_string(),
            axes: args.raw("axes", 2).unwrap_or("x").to_ascii_lowercase(),
        },
        Operation::NoteSpeed => Command::NoteSpeed {
            note: args
                .raw("note", 0)
                .map(parse_note)
                .transpose()?
                .ok_or_else(|| LiveError::invalid("m2s needs a note"))?,
            axis: axis_arg(args.raw("axis", 1).unwrap_or("x"))?,
        },
    };
    Ok(command)
}

impl Command {
    /// Run against the printer. Call this from inside a unit of work.
    pub async fn apply(self, printer: &mut Printer) -> Result<()> {
        match self {
            Command::Draw(d) => printer.draw(d).await.map(drop),
            Command::Travel(d) => printer.travel(d).await.map(drop),
            Command::ExtrudeBy(delta) => printer.extrude_by(delta).await.map(drop),
            Command::ExtrudeTo(target) => printer.extrude_to(target).await.map(drop),
            Command::MoveBy { x, y, z, speed } => printer.move_by(x, y, z, speed).await.map(drop),
            Command::MoveTo { x, y, z, speed } => printer.move_to(x, y, z, speed).await.map(drop),
            Command::Up(z) => printer.up(z).await.map(drop),
            Command::Down(z) => printer.down(z).await.map(drop),
            Command::UpTo(z) => printer.up_to(z).await.map(drop),
            Command::Turn(a) => {
                printer.turn(a);
                Ok(())
            }
            Command::TurnTo(a) => {
                printer.turn_to(a);
                Ok(())
            }
            Command::Elevation(a) => {
                printer.elevation(a);
                Ok(())
            }
            Command::Distance(d) => {
                printer.distance(d);
                Ok(())
            }
            Command::To { x, y, z, time } => printer.to(x, y, z, time.as_deref()),
            Command::Polygon { radius, segments } => printer.polygon(radius, segments).await,
            Command::Rect { width, height } => printer.rect(width, height).await,
            Command::Retract { length, speed } => printer.retract(length, speed).await.map(drop),
            Command::Unretract { length, speed } => printer.unretract(length, speed).await.map(drop),
            Command::FwRetract(on) => printer.fw_retract(on).await,
            Command::AutoRetract(on) => {
                printer.auto_retract(on);
                Ok(())
            }
            Command::RetractSpeed(s) => printer.retract_speed(s).await,
            Command::PrintSpeed(s) => printer.state_mut().set_print_speed(s).map(drop),
            Command::TravelSpeed(s) => printer.state_mut().set_travel_speed(s).map(drop),
            Command::Speed(s) => printer.speed(s).map(drop),
            Command::Thick(h) => printer.state_mut().set_layer_height(h).map(drop),
            Command::Start { hotend, bed } => printer.start(hotend, bed).await,
            Command::Temp(t) => printer.temp(t).await,
            Command::TempWait(t) => printer.temp_wait(t).await,
            Command::Bed(t) => printer.bed(t).await,
            Command::Fan(s) => printer.fan(s).await,
            Command::Wait(t) => printer.wait(t.as_deref()).await,
            Command::Sync => printer.sync().await,
            Command::Gcode(g) => printer.gcode(&g).await,
            Command::Model(id) => printer.set_model(&id),
            Command::Boundary(mode) => {
                printer.state_mut().set_boundary_mode(mode);
                Ok(())
            }
            Command::Bpm(bpm) => printer.state_mut().set_bpm(bpm),
            Command::DrawTime(t) => printer.draw_time(&t).await.map(drop),
            Command::TravelTime(t) => printer.travel_time(&t).await.map(drop),
            Command::DrawUp(d) => printer.draw_up(d).await.map(drop),
            Command::DrawDown(d) => printer.draw_down(d).await.map(drop),
            Command::Fill { width, height, layer_height } => {
                printer.fill(width, height, layer_height).await
            }
            Command::DrawFill { width, height, gap } => printer.draw_fill(width, height, gap).await,
            Command::Pause => printer.pause().await,
            Command::Resume { hotend } => printer.resume(hotend).await,
            Command::Note { note, time, axes } => {
                let ms = parse_time(&time, printer.state().bpm())?;
                printer.note(note, ms, &axes)
            }
            Command::NoteSpeed { note, axis } => printer.note_speed(note, axis).map(drop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve_to_one_operation() {
        assert_eq!(Operation::resolve("ext2"), Some(Operation::ExtrudeTo));
        assert_eq!(Operation::resolve("EXTRUDETO"), Some(Operation::ExtrudeTo));
        assert_eq!(Operation::resolve("psp"), Operation::resolve("printspeed"));
        assert!(Operation::resolve("fly").is_none());
        let names: Vec<&str> = Operation::Retract.aliases().collect();
        assert_eq!(names, vec!["retract", "ret"]);
    }

    #[test]
    fn test_parse_positional_and_named() {
        assert_eq!(parse_line("draw 20").unwrap(), Some(Command::Draw(Some(20.0))));
        assert_eq!(parse_line("dr").unwrap(), Some(Command::Draw(None)));
        assert_eq!(
            parse_line("ext2 x=10 y=20 speed=30").unwrap(),
            Some(Command::ExtrudeTo(AbsoluteMove {
                x: Some(10.0),
                y: Some(20.0),
                speed: Some(30.0),
                ..Default::default()
            }))
        );
        assert_eq!(
            parse_line("mov 5 0 1").unwrap(),
            Some(Command::MoveBy { x: 5.0, y: 0.0, z: 1.0, speed: None })
        );
        assert_eq!(
            parse_line("ret 5 30").unwrap(),
            Some(Command::Retract { length: Some(5.0), speed: Some(30.0) })
        );
    }

    #[test]
    fn test_parse_special_forms() {
        assert_eq!(parse_line("  ; comment").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(
            parse_line("gcode M106 S255").unwrap(),
            Some(Command::Gcode("M106 S255".to_string()))
        );
        assert_eq!(
            parse_line("boundary bounce").unwrap(),
            Some(Command::Boundary(BoundaryMode::Bounce))
        );
        assert_eq!(
            parse_line("rect w=10").unwrap(),
            Some(Command::Rect { width: 10.0, height: 10.0 })
        );
        assert_eq!(
            parse_line("wait 2b").unwrap(),
            Some(Command::Wait(Some("2b".to_string())))
        );
        assert_eq!(parse_line("wait").unwrap(), Some(Command::Wait(None)));
    }

    #[test]
    fn test_parse_musical_and_timed_forms() {
        assert_eq!(
            parse_line("note A4 1b xy").unwrap(),
            Some(Command::Note {
                note: 69.0,
                time: "1b".to_string(),
                axes: "xy".to_string(),
            })
        );
        assert_eq!(
            parse_line("m2s 60 axis=z").unwrap(),
            Some(Command::NoteSpeed { note: 60.0, axis: Axis::Z })
        );
        assert!(parse_line("m2s 60 e").is_err());
        assert_eq!(parse_line("dt 2s").unwrap(), Some(Command::DrawTime("2s".to_string())));
        assert_eq!(parse_line("tt 500").unwrap(), Some(Command::TravelTime("500".to_string())));
        assert_eq!(parse_line("dd 3").unwrap(), Some(Command::DrawDown(3.0)));
        assert_eq!(
            parse_line("drawfill 10 20 gap=0.5").unwrap(),
            Some(Command::DrawFill { width: 10.0, height: 20.0, gap: Some(0.5) })
        );
        assert_eq!(parse_line("resume").unwrap(), Some(Command::Resume { hotend: 190.0 }));
        assert!(parse_line("fill 10").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_line("fly 10"), Err(LiveError::InvalidArgument(_))));
        assert!(parse_line("draw far").is_err());
        assert!(parse_line("turn").is_err());
        assert!(parse_line("polygon 10 2").is_err());
        assert!(parse_line("boundary wrap").is_err());
    }
}
