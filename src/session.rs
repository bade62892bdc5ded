// src/session.rs - One live printing session: printer, command queue, timed tasks, device listeners
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, RwLock, broadcast};

use crate::commands::{Command, parse_line};
use crate::communication::{DeviceResponse, InstructionSink, parse_response};
use crate::config::Config;
use crate::error::Result;
use crate::printer::{PrintEvent, Printer, PrinterSnapshot};
use crate::scheduler::command_queue::MAX_PRIORITY;
use crate::scheduler::{
    CommandScheduler, JobHandle, JobOptions, SchedulerSettings, Task, TaskScheduler,
};

pub const TEMPERATURE_POLL_TASK: &str = "temperature-poll";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    Ok,
    Position,
    Temperature,
    Error,
    Unrecognized,
}

impl ResponseKind {
    pub fn of(response: &DeviceResponse) -> Self {
        match response {
            DeviceResponse::Ok => ResponseKind::Ok,
            DeviceResponse::Position(_) => ResponseKind::Position,
            DeviceResponse::Temperature(_) => ResponseKind::Temperature,
            DeviceResponse::Error(_) => ResponseKind::Error,
            DeviceResponse::Unrecognized(_) => ResponseKind::Unrecognized,
        }
    }
}

pub type ResponseListener =
    Arc<dyn Fn(DeviceResponse) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Everything needed to drive one printer live.
///
/// All printer work goes through the command queue, so the printer state is
/// only touched by the unit currently running.
#[derive(Clone)]
pub struct LiveSession {
    printer: Arc<Mutex<Printer>>,
    commands: CommandScheduler,
    tasks: TaskScheduler,
    listeners: Arc<RwLock<HashMap<ResponseKind, Vec<ResponseListener>>>>,
    default_priority: u8,
    poll_interval: Option<Duration>,
}

impl LiveSession {
    pub async fn new(config: &Config, sink: Arc<dyn InstructionSink>) -> Result<Self> {
        let printer = Arc::new(Mutex::new(Printer::new(config, sink)?));
        let session = Self {
            printer: printer.clone(),
            commands: CommandScheduler::new(SchedulerSettings::from(&config.queue)),
            tasks: TaskScheduler::new(&config.tasks),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            default_priority: config.queue.default_priority,
            poll_interval: (config.tasks.temperature_poll_ms > 0)
                .then(|| Duration::from_millis(config.tasks.temperature_poll_ms)),
        };

        // keep our idea of the position in step with what the firmware reports
        session
            .on_response(ResponseKind::Position, move |response| {
                let printer = printer.clone();
                async move {
                    if let DeviceResponse::Position(reported) = response {
                        printer.lock().await.sync_position(&reported);
                    }
                    Ok(())
                }
            })
            .await;
        Ok(session)
    }

    pub fn commands(&self) -> &CommandScheduler {
        &self.commands
    }

    pub fn tasks(&self) -> &TaskScheduler {
        &self.tasks
    }

    /// Start the task ticker and, if configured, the temperature poll.
    pub async fn start(&self) {
        self.tasks.start().await;
        if let Some(every) = self.poll_interval {
            let printer = self.printer.clone();
            let commands = self.commands.clone();
            let poll = Task::new(TEMPERATURE_POLL_TASK, every, move |_| {
                let printer = printer.clone();
                let commands = commands.clone();
                async move {
                    // fire and forget; the queue reports failures
                    let _ = gcode_unit(&commands, printer, "M105".to_string(), MAX_PRIORITY).await;
                    Ok(())
                }
            })
            .repeating()
            .system();
            self.tasks.schedule(poll).await;
        }
        tracing::info!("Live session started");
    }

    /// Queue a command at the default priority.
    pub async fn submit(&self, command: Command) -> JobHandle<()> {
        self.submit_with(command, JobOptions::with_priority(self.default_priority))
            .await
    }

    pub async fn submit_with(&self, command: Command, options: JobOptions) -> JobHandle<()> {
        let printer = self.printer.clone();
        tracing::debug!("Queueing {:?}", command);
        self.commands
            .schedule(options, async move {
                let mut printer = printer.lock().await;
                command.apply(&mut printer).await
            })
            .await
    }

    /// Parse a line and queue it. `Ok(None)` for blank lines and comments.
    pub async fn submit_line(&self, line: &str) -> Result<Option<JobHandle<()>>> {
        match parse_line(line)? {
            Some(command) => Ok(Some(self.submit(command).await)),
            None => Ok(None),
        }
    }

    /// Queue one raw instruction as its own unit of work.
    pub async fn schedule_gcode(&self, gcode: impl Into<String>, priority: u8) -> JobHandle<()> {
        gcode_unit(&self.commands, self.printer.clone(), gcode.into(), priority).await
    }

    /// Copy of the printer state, read in queue order.
    pub async fn snapshot(&self) -> Result<PrinterSnapshot> {
        let printer = self.printer.clone();
        self.commands
            .schedule(JobOptions::with_priority(self.default_priority), async move {
                Ok(printer.lock().await.snapshot())
            })
            .await
            .result()
            .await
    }

    /// Moves and retractions, as the printer performs them.
    pub async fn print_events(&self) -> broadcast::Receiver<PrintEvent> {
        self.printer.lock().await.subscribe()
    }

    /// Attach a listener for one kind of device response.
    pub async fn on_response<F, Fut>(&self, kind: ResponseKind, listener: F)
    where
        F: Fn(DeviceResponse) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener: ResponseListener =
            Arc::new(move |response| -> BoxFuture<'static, Result<()>> { Box::pin(listener(response)) });
        self.listeners
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(listener);
    }

    /// Classify a line from the device and queue every matching listener
    /// as a unit of work.
    pub async fn handle_response(&self, line: &str) -> Vec<JobHandle<()>> {
        let response = parse_response(line);
        let kind = ResponseKind::of(&response);
        if let DeviceResponse::Error(message) = &response {
            tracing::warn!("Device reported error: {}", message);
        }
        let listeners = self
            .listeners
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        let mut handles = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let response = response.clone();
            let options = JobOptions::with_priority(self.default_priority);
            handles.push(self.commands.schedule(options, listener(response)).await);
        }
        handles
    }

    /// Stop everything now; queued work is dropped.
    pub async fn stop(&self) {
        self.tasks.stop().await;
        self.commands.stop().await;
    }

    /// Let queued work finish, then stop.
    pub async fn shutdown(&self) {
        self.tasks.stop().await;
        let _ = self.commands.flush().await;
        self.commands.stop().await;
        tracing::info!("Live session shut down");
    }
}

async fn gcode_unit(
    commands: &CommandScheduler,
    printer: Arc<Mutex<Printer>>,
    gcode: String,
    priority: u8,
) -> JobHandle<()> {
    commands
        .schedule(JobOptions::with_priority(priority), async move {
            printer.lock().await.gcode(&gcode).await
        })
        .await
}
