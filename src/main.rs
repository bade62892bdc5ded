// src/main.rs - Live host: reads commands on stdin, writes G-code on stdout
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use liveprint_rs::communication::{InstructionSink, WriterSink};
use liveprint_rs::motion::BoundaryMode;
use liveprint_rs::scheduler::{QueueEvent, TaskEvent};
use liveprint_rs::{Config, LiveSession, load_config};

/// Lines starting with this are device output rather than commands.
const RESPONSE_PREFIX: &str = "<";

#[derive(Parser, Debug)]
#[command(name = "liveprint-host", version, about = "Live-coded 3D printing host")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Printer model id, overrides the config file
    #[arg(short, long)]
    model: Option<String>,

    /// Bounce off the envelope walls instead of clamping
    #[arg(long)]
    bounce: bool,

    /// Poll temperatures every N milliseconds (0 disables)
    #[arg(long)]
    poll_ms: Option<u64>,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // stdout carries G-code, so logs go to stderr
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting LivePrint host");

    let mut config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path.display(), e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    if let Some(model) = args.model {
        config.printer.model = model;
    }
    if args.bounce {
        config.printer.boundary_mode = BoundaryMode::Bounce;
    }
    if let Some(poll_ms) = args.poll_ms {
        config.tasks.temperature_poll_ms = poll_ms;
    }
    config.validate()?;

    tracing::info!(
        "Printer: {} ({:?} at the walls)",
        config.printer.model,
        config.printer.boundary_mode
    );

    let sink: Arc<dyn InstructionSink> = Arc::new(WriterSink::new(tokio::io::stdout()));
    let session = LiveSession::new(&config, sink).await?;
    tokio::spawn(log_queue_events(session.commands().subscribe()));
    tokio::spawn(log_task_events(session.tasks().subscribe()));
    session.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(response) = line.strip_prefix(RESPONSE_PREFIX) {
            session.handle_response(response).await;
            continue;
        }
        match session.submit_line(&line).await {
            Ok(Some(handle)) => {
                let id = handle.id().to_string();
                tokio::spawn(async move {
                    if let Err(e) = handle.result().await {
                        tracing::error!("{}: {}", id, e);
                    }
                });
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Rejected '{}': {}", line.trim(), e),
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn log_queue_events(mut events: broadcast::Receiver<QueueEvent>) {
    loop {
        match events.recv().await {
            Ok(QueueEvent::Queued { job, queued }) => {
                tracing::debug!("Queued {} (priority {}, {} waiting)", job.id, job.priority, queued)
            }
            Ok(QueueEvent::Started { job }) => tracing::debug!("Running {}", job.id),
            Ok(QueueEvent::Done { job, queued }) => {
                tracing::debug!("Finished {} ({} waiting)", job.id, queued)
            }
            Ok(QueueEvent::Failed { job, error }) => tracing::warn!("{} failed: {}", job.id, error),
            Ok(QueueEvent::Dropped { job, reason }) => {
                tracing::warn!("Dropped {}: {:?}", job.id, reason)
            }
            Ok(QueueEvent::Restarted { generation }) => {
                tracing::warn!("Command worker restarted (generation {})", generation)
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} queue events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_task_events(mut events: broadcast::Receiver<TaskEvent>) {
    loop {
        match events.recv().await {
            Ok(TaskEvent::EventAdded { name }) => tracing::info!("Task '{}' scheduled", name),
            Ok(TaskEvent::EventRemoved { name }) => tracing::info!("Task '{}' removed", name),
            Ok(TaskEvent::EventsCleared) => tracing::info!("Tasks cleared"),
            Ok(TaskEvent::EventRun { name, time }) => {
                tracing::debug!("Task '{}' ran at {:?}", name, time)
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Missed {} task events", n)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
