// src/communication/responses.rs - Classify lines coming back from the firmware
use liveprint_shared::{Axis, Position};

/// Current and target temperature of one heater, °C.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterReading {
    pub current: f64,
    pub target: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TemperatureReport {
    pub hotend: Option<HeaterReading>,
    pub bed: Option<HeaterReading>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceResponse {
    /// Plain acknowledgement.
    Ok,
    /// M114 style report; only the axes that were present are set.
    Position(Position),
    Temperature(TemperatureReport),
    Error(String),
    Unrecognized(String),
}

/// Parse one line of Marlin-style output.
pub fn parse_response(line: &str) -> DeviceResponse {
    let line = line.trim();
    let lower = line.to_ascii_lowercase();
    if lower.starts_with("error") || line.starts_with("!!") {
        let message = line
            .split_once(':')
            .map(|(_, rest)| rest.trim())
            .unwrap_or(line);
        return DeviceResponse::Error(message.to_string());
    }

    let body = if lower == "ok" {
        return DeviceResponse::Ok;
    } else if lower.starts_with("ok ") {
        line[3..].trim_start()
    } else {
        line
    };

    if let Some(temps) = parse_temperature(body) {
        return DeviceResponse::Temperature(temps);
    }
    if let Some(position) = parse_position(body) {
        return DeviceResponse::Position(position);
    }
    if body.len() != line.len() {
        // "ok" followed by something we don't care about
        return DeviceResponse::Ok;
    }
    DeviceResponse::Unrecognized(line.to_string())
}

fn parse_position(body: &str) -> Option<Position> {
    let mut position = Position::empty();
    for token in body.split_whitespace() {
        if token.eq_ignore_ascii_case("count") {
            // stepper counts follow, and reuse the same axis names
            break;
        }
        let (name, value) = token.split_once(':')?;
        let axis = Axis::from_name(name)?;
        let value: f64 = value.parse().ok()?;
        position = position.with(axis, value);
    }
    position.axes().next().map(|_| position)
}

fn parse_temperature(body: &str) -> Option<TemperatureReport> {
    if !body.starts_with("T:") && !body.starts_with("T0:") {
        return None;
    }
    let mut report = TemperatureReport::default();
    let mut tokens = body.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let Some((name, value)) = token.split_once(':') else {
            continue;
        };
        let slot = match name {
            "T" | "T0" => &mut report.hotend,
            "B" => &mut report.bed,
            _ => continue,
        };
        let Ok(current) = value.parse::<f64>() else {
            continue;
        };
        let target = tokens
            .peek()
            .and_then(|next| next.strip_prefix('/'))
            .and_then(|t| t.parse::<f64>().ok());
        if target.is_some() {
            tokens.next();
        }
        if slot.is_none() {
            *slot = Some(HeaterReading { current, target });
        }
    }
    report.hotend.map(|_| report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_report() {
        let r = parse_response("X:10.00 Y:20.50 Z:0.20 E:1.25 Count X:800 Y:1640 Z:16");
        assert_eq!(r, DeviceResponse::Position(Position::xyze(10.0, 20.5, 0.2, 1.25)));
    }

    #[test]
    fn test_temperature_report() {
        let r = parse_response("ok T:201.3 /200.0 B:60.1 /60.0 @:127 B@:0");
        let DeviceResponse::Temperature(t) = r else {
            panic!("expected temperature, got {:?}", r);
        };
        assert_eq!(t.hotend, Some(HeaterReading { current: 201.3, target: Some(200.0) }));
        assert_eq!(t.bed, Some(HeaterReading { current: 60.1, target: Some(60.0) }));
    }

    #[test]
    fn test_ok_and_errors() {
        assert_eq!(parse_response("ok"), DeviceResponse::Ok);
        assert_eq!(parse_response("ok N12 P15 B3"), DeviceResponse::Ok);
        assert_eq!(
            parse_response("Error:Printer halted. kill() called!"),
            DeviceResponse::Error("Printer halted. kill() called!".to_string())
        );
        assert_eq!(
            parse_response("echo:busy: processing"),
            DeviceResponse::Unrecognized("echo:busy: processing".to_string())
        );
    }
}
