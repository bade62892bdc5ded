// Benchmark for move planning and segmented execution
// Run with: cargo bench

use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use liveprint_rs::communication::RecordingSink;
use liveprint_rs::motion::{AbsoluteMove, BoundaryMode, KinematicState, MoveRequest, planner};
use liveprint_rs::{Config, Printer};

fn bench_planner(c: &mut Criterion) {
    let state = KinematicState::new(&Config::default()).unwrap();
    let requests: Vec<MoveRequest> = (0..1000)
        .map(|i| MoveRequest::Absolute(AbsoluteMove::to((i % 200) as f64, (i % 150) as f64, 0.2)))
        .collect();
    c.bench_function("plan 1000 absolute moves", |b| {
        b.iter(|| {
            let planned = requests
                .iter()
                .filter(|r| matches!(planner::plan(&state, r), Ok(Some(_))))
                .count();
            assert!(planned > 0);
        });
    });
}

fn bench_bounce_execution(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut config = Config::default();
    config.printer.boundary_mode = BoundaryMode::Bounce;
    config.safety.max_time_per_operation_ms = 600_000.0;
    c.bench_function("travel 2000mm bouncing off walls", |b| {
        b.iter(|| {
            rt.block_on(async {
                let sink = Arc::new(RecordingSink::new());
                let mut printer = Printer::new(&config, sink.clone()).unwrap();
                printer.turn_to(37.0);
                printer.travel(Some(2000.0)).await.unwrap();
                assert!(!sink.lines().await.is_empty());
            });
        });
    });
}

fn bench_polygon(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = Config::default();
    c.bench_function("print 64-sided polygon", |b| {
        b.iter(|| {
            rt.block_on(async {
                let sink = Arc::new(RecordingSink::new());
                let mut printer = Printer::new(&config, sink.clone()).unwrap();
                printer
                    .move_to(Some(100.0), Some(100.0), Some(0.2), None)
                    .await
                    .unwrap();
                printer.polygon(40.0, 64).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_planner, bench_bounce_execution, bench_polygon);
criterion_main!(benches);
