// Integration tests for planning and executing moves against a recording sink

use std::f64::consts::PI;
use std::sync::Arc;

use liveprint_rs::communication::RecordingSink;
use liveprint_rs::motion::{AbsoluteMove, BoundaryMode, MoveRequest};
use liveprint_rs::{Axis, Config, LiveError, PrintEvent, Printer, SafetyViolation};

fn printer_with(mode: BoundaryMode) -> (Printer, Arc<RecordingSink>) {
    let mut config = Config::default();
    config.printer.boundary_mode = mode;
    let sink = Arc::new(RecordingSink::new());
    let printer = Printer::new(&config, sink.clone()).unwrap();
    (printer, sink)
}

#[tokio::test]
async fn test_straight_move_clamps_at_wall() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.state_mut().set_max(Axis::X, 200.0).unwrap();
    printer.turn_to(0.0);

    printer.travel(Some(250.0)).await.unwrap();

    assert_eq!(printer.state().position().x(), 200.0);
    let lines = sink.lines().await;
    assert!(lines.len() >= 2, "expected a split move, got {:?}", lines);
    assert!(lines.iter().all(|l| l.starts_with("G1 X")));
}

#[tokio::test]
async fn test_straight_move_bounces_off_wall() {
    let (mut printer, sink) = printer_with(BoundaryMode::Bounce);
    printer.state_mut().set_max(Axis::X, 200.0).unwrap();
    printer.turn_to(0.0);
    let heading_before = printer.state().heading();

    let report = printer.travel(Some(250.0)).await.unwrap().unwrap();

    let x = printer.state().position().x();
    assert!(x < 200.0);
    assert!((x - 150.0).abs() < 1e-9);
    assert_eq!(report.bounces, 1);
    assert!((printer.state().heading() - heading_before).abs() > 1e-6);
    assert!((printer.state().heading() - PI).abs() < 1e-9);
    assert!(sink.lines().await.len() >= 2);
}

#[tokio::test]
async fn test_retraction_guard_emits_once() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);

    assert!(printer.retract(Some(5.0), Some(30.0)).await.unwrap());
    assert!(!printer.retract(Some(5.0), Some(30.0)).await.unwrap());

    assert_eq!(sink.lines().await, vec!["G1 E-5.0000 F1800.0000".to_string()]);
    assert_eq!(printer.state().retraction.current, 5.0);
}

#[tokio::test]
async fn test_relative_round_trip_returns_to_start() {
    let (mut printer, _sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(100.0), Some(100.0), None, None).await.unwrap();
    let start = printer.state().position();

    printer.turn_to(30.0);
    printer.travel(Some(40.0)).await.unwrap();
    printer.travel(Some(-40.0)).await.unwrap();

    let end = printer.state().position();
    assert!((end.x() - start.x()).abs() < 1e-3);
    assert!((end.y() - start.y()).abs() < 1e-3);

    printer.move_by(12.5, -7.5, 0.0, None).await.unwrap();
    printer.move_by(-12.5, 7.5, 0.0, None).await.unwrap();
    let back = printer.state().position();
    assert!((back.x() - end.x()).abs() < 1e-3);
    assert!((back.y() - end.y()).abs() < 1e-3);
    assert_eq!(back.e(), end.e());
}

#[tokio::test]
async fn test_too_short_filament_emits_nothing() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    let err = printer.draw(Some(0.001)).await.unwrap_err();
    assert!(matches!(
        err,
        LiveError::Safety(SafetyViolation::FilamentTooShort { .. })
    ));
    assert!(sink.lines().await.is_empty());
    assert_eq!(printer.state().position().e(), 0.0);
}

#[tokio::test]
async fn test_safety_limits_reject_before_emitting() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);

    let too_much = printer
        .extrude_to(AbsoluteMove::default().with_e(50.0))
        .await
        .unwrap_err();
    assert!(matches!(too_much, LiveError::Safety(SafetyViolation::FilamentTooLong { .. })));

    let too_fast = printer
        .execute(MoveRequest::Absolute(AbsoluteMove::to(0.0, 0.0, 100.0).with_speed(100.0)))
        .await
        .unwrap_err();
    assert!(matches!(
        too_fast,
        LiveError::Safety(SafetyViolation::AxisTooFast { axis: Axis::Z, .. })
    ));

    printer.state_mut().set_travel_speed(1.0).unwrap();
    let too_long = printer.travel(Some(100.0)).await.unwrap_err();
    assert!(matches!(too_long, LiveError::Safety(SafetyViolation::MoveTooLong { .. })));

    assert!(sink.lines().await.is_empty());
}

#[tokio::test]
async fn test_draw_unretracts_before_extruding() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.retract(None, None).await.unwrap();
    sink.take().await;

    printer.draw(Some(10.0)).await.unwrap();

    let lines = sink.lines().await;
    // unretract, the move, then the automatic retract
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "G1 E0.0000 F1800.0000");
    assert!(lines[1].starts_with("G1 X10 Y0 Z0 E0.4"));
    assert!(printer.state().retraction.is_retracted());
}

#[tokio::test]
async fn test_polygon_closes_and_retracts_once() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(100.0), Some(100.0), Some(0.2), None).await.unwrap();
    let start = printer.state().position();
    sink.take().await;

    printer.polygon(20.0, 4).await.unwrap();

    let lines = sink.lines().await;
    assert_eq!(lines.len(), 5, "{:?}", lines);
    assert!(lines[4].starts_with("G1 E-"));
    let end = printer.state().position();
    assert!((end.x() - start.x()).abs() < 1e-3);
    assert!((end.y() - start.y()).abs() < 1e-3);
    assert!(printer.state().retraction.auto);
}

#[tokio::test]
async fn test_rect_draws_four_sides_then_moves_on() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), None, None).await.unwrap();
    printer.turn_to(0.0);
    sink.take().await;

    printer.rect(10.0, 20.0).await.unwrap();

    let lines = sink.lines().await;
    // four sides, one retract, one travel
    assert_eq!(lines.len(), 6, "{:?}", lines);
    let p = printer.state().position();
    assert!((p.x() - 60.0).abs() < 1e-3);
    assert!((p.y() - 50.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_to_aims_without_moving() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.to(Some(30.0), Some(40.0), None, Some("1s")).unwrap();
    assert!(sink.lines().await.is_empty());
    assert_eq!(printer.state().pending_distance(), 50.0);
    assert_eq!(printer.state().travel_speed(), 50.0);

    printer.travel(None).await.unwrap();
    let p = printer.state().position();
    assert!((p.x() - 30.0).abs() < 1e-3);
    assert!((p.y() - 40.0).abs() < 1e-3);
    assert!((printer.state().total_move_time_ms() - 1000.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_start_resets_session() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.start(200.0, 60.0).await.unwrap();
    let lines = sink.lines().await;
    assert_eq!(
        lines,
        vec!["G28", "M114", "M106 S0", "M104 S200", "M140 S60", "M105", "M114"]
    );
    let p = printer.state().position();
    assert_eq!((p.x(), p.y(), p.z()), (0.0, 223.0, 205.0));
    assert_eq!(printer.state().travel_speed(), 50.0);
}

#[tokio::test]
async fn test_position_stays_inside_envelope() {
    for mode in [BoundaryMode::Clamp, BoundaryMode::Bounce] {
        let (mut printer, _sink) = printer_with(mode);
        let (min, max) = printer.state().envelope();
        printer.move_to(Some(100.0), Some(100.0), Some(50.0), None).await.unwrap();

        let mut moves = 0;
        for heading in (0..360).step_by(23) {
            for elevation in [-60.0, -15.0, 0.0, 20.0, 75.0] {
                for distance in [7.0, 90.0, 310.0, 700.0] {
                    printer.turn_to(f64::from(heading));
                    printer.elevation(elevation);
                    if moves % 2 == 0 {
                        printer.travel(Some(distance)).await.unwrap();
                    } else {
                        printer.draw(Some(distance)).await.unwrap();
                    }
                    moves += 1;
                    let p = printer.state().position();
                    for axis in Axis::SPATIAL {
                        let v = p.get(axis).unwrap();
                        assert!(
                            v >= min.get(axis).unwrap() - 1e-6 && v <= max.get(axis).unwrap() + 1e-6,
                            "{:?}: {} left the envelope at {}",
                            mode,
                            axis,
                            p
                        );
                    }
                }
            }
        }
        assert_eq!(moves, 320);
    }
}

#[tokio::test]
async fn test_firmware_retraction_moves_filament_axis() {
    let mut config = Config::default();
    config.printer.firmware_retract = true;
    let sink = Arc::new(RecordingSink::new());
    let mut printer = Printer::new(&config, sink.clone()).unwrap();
    let e0 = printer.state().position().e();

    printer.retract(Some(5.0), Some(30.0)).await.unwrap();
    assert_eq!(printer.state().position().e(), e0 - 5.0);
    printer.unretract(None, None).await.unwrap();
    assert_eq!(printer.state().position().e(), e0);

    let lines = sink.lines().await;
    assert_eq!(&lines[lines.len() - 2..], &["G10".to_string(), "G11".to_string()]);
}

fn kind(event: &PrintEvent) -> &'static str {
    match event {
        PrintEvent::Extrude { .. } => "extrude",
        PrintEvent::Travel { .. } => "travel",
        PrintEvent::Retract { .. } => "retract",
        PrintEvent::Unretract { .. } => "unretract",
    }
}

#[tokio::test]
async fn test_print_events_follow_moves() {
    let (mut printer, _sink) = printer_with(BoundaryMode::Clamp);
    let mut events = printer.subscribe();

    printer.move_to(Some(20.0), Some(20.0), None, None).await.unwrap();
    printer.turn_to(0.0);
    printer.draw(Some(10.0)).await.unwrap();
    printer.draw(Some(10.0)).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let kinds: Vec<&str> = seen.iter().map(kind).collect();
    assert_eq!(
        kinds,
        vec!["travel", "extrude", "retract", "unretract", "extrude", "retract"]
    );
    match &seen[1] {
        PrintEvent::Extrude { start, end, speed, length, .. } => {
            assert_eq!((start.x(), start.y()), (20.0, 20.0));
            assert!((end.x() - 30.0).abs() < 1e-9);
            assert!((length - 10.0).abs() < 1e-9);
            assert_eq!(*speed, 50.0);
        }
        other => panic!("expected an extrude event, got {:?}", other),
    }
    assert_eq!(seen[2], PrintEvent::Retract { length: 8.5, speed: 30.0 });
}

#[tokio::test]
async fn test_timed_moves_use_current_speeds() {
    let (mut printer, _sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), None, None).await.unwrap();
    printer.turn_to(0.0);
    let before = printer.state().total_move_time_ms();

    printer.draw_time("1s").await.unwrap();
    assert!((printer.state().position().x() - 100.0).abs() < 1e-3);
    assert!((printer.state().total_move_time_ms() - before - 1000.0).abs() < 1e-6);

    printer.turn_to(90.0);
    printer.travel_time("500ms").await.unwrap();
    // travel speed defaults to 80 mm/s
    assert!((printer.state().position().y() - 90.0).abs() < 1e-3);
    assert!(printer.draw_time("soon").await.is_err());
}

#[tokio::test]
async fn test_draw_up_and_down_are_vertical() {
    let (mut printer, _sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), Some(10.0), None).await.unwrap();

    let report = printer.draw_up(5.0).await.unwrap().unwrap();
    let p = printer.state().position();
    assert!((p.z() - 15.0).abs() < 1e-3);
    assert!((p.x() - 50.0).abs() < 1e-3 && (p.y() - 50.0).abs() < 1e-3);
    assert!(report.filament > 0.0);
    assert_eq!(report.speed, 50.0);

    printer.draw_down(5.0).await.unwrap();
    assert!((printer.state().position().z() - 10.0).abs() < 1e-3);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), Some(10.0), None).await.unwrap();
    sink.take().await;

    printer.pause().await.unwrap();
    printer.resume(200.0).await.unwrap();

    assert_eq!(
        sink.lines().await,
        vec![
            "G1 X50 Y50 Z10 E-16 F2700.0000",
            "G1 X50 Y50 Z13 E-16 F4800.0000",
            "M104 S0",
            "M107",
            "M109 S200",
            "M106 S100",
            "G1 X50 Y50 Z13 E0 F2700.0000",
        ]
    );
    assert_eq!(printer.state().position().e(), 0.0);
}

#[tokio::test]
async fn test_draw_fill_snakes_back_and_retracts_once() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), Some(0.2), None).await.unwrap();
    printer.turn_to(0.0);
    sink.take().await;

    printer.draw_fill(3.0, 10.0, Some(1.0)).await.unwrap();

    let lines = sink.lines().await;
    // four passes of two draws, then one retract
    assert_eq!(lines.len(), 9, "{:?}", lines);
    assert!(lines[8].starts_with("G1 E-"));
    let p = printer.state().position();
    assert!((p.x() - 50.0).abs() < 1e-3);
    assert!((p.y() - 46.0).abs() < 1e-3);
    assert!(printer.state().retraction.auto);
}

#[tokio::test]
async fn test_fill_alternates_lines() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(50.0), Some(50.0), Some(0.2), None).await.unwrap();
    sink.take().await;

    printer.fill(10.0, 1.0, Some(0.2)).await.unwrap();

    // travel, extrude, retract; travel, unretract, extrude, retract
    assert_eq!(sink.lines().await.len(), 7);
    let p = printer.state().position();
    assert!((p.x() - 50.0).abs() < 1e-3);
    assert!((p.y() - (50.0 + 0.4 * PI)).abs() < 1e-3);
}

#[tokio::test]
async fn test_notes_set_speed_and_direction() {
    let (mut printer, sink) = printer_with(BoundaryMode::Clamp);
    printer.move_to(Some(100.0), Some(100.0), None, None).await.unwrap();
    printer.turn_to(0.0);
    sink.take().await;

    printer.note(69.0, 1000.0, "x").unwrap();
    let a4 = 440.0 / 47.069852;
    assert!((printer.state().travel_speed() - a4).abs() < 1e-9);
    assert!((printer.state().pending_distance() - a4).abs() < 1e-9);
    printer.travel(None).await.unwrap();
    assert!((printer.state().position().x() - (100.0 - a4)).abs() < 1e-3);

    // rests become the next wait
    printer.note(5.0, 250.0, "x").unwrap();
    assert_eq!(printer.state().pending_distance(), 0.0);
    printer.wait(None).await.unwrap();
    assert_eq!(sink.lines().await.last().unwrap(), "G4 P250");

    assert!((printer.note_speed(81.0, Axis::Z).unwrap() - 5.5).abs() < 1e-9);
    assert!(printer.note(60.0, 100.0, "e").is_err());
}
