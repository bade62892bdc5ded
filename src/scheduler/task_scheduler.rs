// src/scheduler/task_scheduler.rs - Named, optionally repeating timed tasks
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::TaskConfig;
use crate::error::Result;

/// Called with the task's target time (since scheduler start).
pub type TaskAction = Arc<dyn Fn(Duration) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub delay: Duration,
    pub repeat: bool,
    /// Survives `clear_user_tasks`.
    pub system: bool,
    action: TaskAction,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, delay: Duration, action: F) -> Self
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let action: TaskAction =
            Arc::new(move |time| -> BoxFuture<'static, Result<()>> { Box::pin(action(time)) });
        Self {
            name: name.into(),
            delay,
            repeat: false,
            system: false,
            action,
        }
    }

    pub fn repeating(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("repeat", &self.repeat)
            .field("system", &self.system)
            .finish()
    }
}

/// Snapshot of a scheduled task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub name: String,
    pub delay: Duration,
    pub repeat: bool,
    pub system: bool,
    pub running: bool,
    pub target: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    EventAdded { name: String },
    EventRemoved { name: String },
    EventsCleared,
    /// Not emitted for system tasks.
    EventRun { name: String, time: Duration },
}

struct Entry {
    serial: u64,
    task: Task,
    target: Duration,
    running: bool,
}

impl Entry {
    fn info(&self) -> TaskInfo {
        TaskInfo {
            name: self.task.name.clone(),
            delay: self.task.delay,
            repeat: self.task.repeat,
            system: self.task.system,
            running: self.running,
            target: self.target,
        }
    }
}

struct Inner {
    entries: Mutex<Vec<Entry>>,
    pending_add: Mutex<Vec<Task>>,
    pending_remove: Mutex<Vec<String>>,
    events: broadcast::Sender<TaskEvent>,
    serial: AtomicU64,
    started: Instant,
    tick: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn emit(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}

/// Cooperative timer loop independent of the command queue.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(config: &TaskConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                pending_add: Mutex::new(Vec::new()),
                pending_remove: Mutex::new(Vec::new()),
                events,
                serial: AtomicU64::new(0),
                started: Instant::now(),
                tick: Duration::from_millis(config.tick_interval_ms.max(1)),
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    /// Time since the scheduler was created.
    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Start ticking. Calling it again is a no-op. The ticker ends on its
    /// own once every handle to the scheduler is gone.
    pub async fn start(&self) {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.tick;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    tracing::debug!("Task scheduler dropped, ticker exiting");
                    break;
                };
                let scheduler = TaskScheduler { inner };
                scheduler.run_due(scheduler.elapsed()).await;
            }
        }));
        tracing::debug!("Task scheduler ticking every {:?}", period);
    }

    /// Add a task on the next tick. A task with the same name is replaced.
    /// The first run happens on that tick.
    pub async fn schedule(&self, task: Task) {
        self.inner.pending_add.lock().await.push(task);
    }

    /// Remove a task by name on the next tick.
    pub async fn remove(&self, name: &str) {
        self.inner.pending_remove.lock().await.push(name.to_string());
    }

    pub async fn get(&self, name: &str) -> Option<TaskInfo> {
        let entries = self.inner.entries.lock().await;
        entries.iter().find(|e| e.task.name == name).map(Entry::info)
    }

    pub async fn tasks(&self) -> Vec<TaskInfo> {
        self.inner.entries.lock().await.iter().map(Entry::info).collect()
    }

    /// One tick: pending removals, pending additions, then every due task
    /// that is not already running. Returns the spawned runs.
    pub async fn run_due(&self, now: Duration) -> Vec<JoinHandle<()>> {
        let removals = std::mem::take(&mut *self.inner.pending_remove.lock().await);
        let additions = std::mem::take(&mut *self.inner.pending_add.lock().await);

        let mut entries = self.inner.entries.lock().await;
        for name in removals {
            let before = entries.len();
            entries.retain(|e| e.task.name != name);
            if entries.len() != before {
                self.inner.emit(TaskEvent::EventRemoved { name });
            }
        }
        for task in additions {
            if let Some(idx) = entries.iter().position(|e| e.task.name == task.name) {
                let replaced = entries.remove(idx);
                self.inner.emit(TaskEvent::EventRemoved { name: replaced.task.name });
            }
            let name = task.name.clone();
            entries.push(Entry {
                serial: self.inner.serial.fetch_add(1, Ordering::SeqCst),
                task,
                target: now,
                running: false,
            });
            self.inner.emit(TaskEvent::EventAdded { name });
        }

        let mut handles = Vec::new();
        for entry in entries.iter_mut() {
            if entry.running || entry.target > now {
                continue;
            }
            entry.running = true;
            handles.push(tokio::spawn(run_entry(
                self.inner.clone(),
                entry.serial,
                entry.task.clone(),
                entry.target,
            )));
        }
        handles
    }

    /// Remove every task not flagged `system`.
    pub async fn clear_user_tasks(&self) {
        let mut entries = self.inner.entries.lock().await;
        let mut removed = Vec::new();
        entries.retain(|e| {
            if e.task.system {
                true
            } else {
                removed.push(e.task.name.clone());
                false
            }
        });
        self.inner.pending_add.lock().await.retain(|t| t.system);
        for name in removed {
            self.inner.emit(TaskEvent::EventRemoved { name });
        }
    }

    /// Remove everything, system tasks included.
    pub async fn clear(&self) {
        self.inner.entries.lock().await.clear();
        self.inner.pending_add.lock().await.clear();
        self.inner.pending_remove.lock().await.clear();
        self.inner.emit(TaskEvent::EventsCleared);
    }

    /// Stop ticking and clear all tasks.
    pub async fn stop(&self) {
        if let Some(ticker) = self.inner.ticker.lock().await.take() {
            ticker.abort();
        }
        self.clear().await;
        tracing::debug!("Task scheduler stopped");
    }
}

async fn run_entry(inner: Arc<Inner>, serial: u64, task: Task, target: Duration) {
    if let Err(err) = (task.action)(target).await {
        tracing::warn!("Task '{}' failed: {}", task.name, err);
    }
    let mut entries = inner.entries.lock().await;
    // removed or replaced while it ran
    let Some(idx) = entries.iter().position(|e| e.serial == serial) else {
        return;
    };
    if !task.system {
        inner.emit(TaskEvent::EventRun {
            name: task.name.clone(),
            time: target,
        });
    }
    if task.repeat {
        let entry = &mut entries[idx];
        entry.target += task.delay;
        entry.running = false;
    } else {
        entries.remove(idx);
        inner.emit(TaskEvent::EventRemoved { name: task.name });
    }
}
