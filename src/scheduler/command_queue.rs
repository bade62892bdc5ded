// src/scheduler/command_queue.rs - Priority queue that runs one unit of work at a time
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify, broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{LiveError, Result};

/// Lowest priority; 0 is the most urgent.
pub const MAX_PRIORITY: u8 = 9;
pub const DEFAULT_PRIORITY: u8 = 4;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Units allowed to wait before the oldest least-urgent one is dropped.
    pub max_queued: usize,
    /// Default time a unit may wait before it is discarded.
    pub expiration: Option<Duration>,
    /// Shortest gap between two unit starts.
    pub min_interval: Duration,
    pub event_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_queued: 10000,
            expiration: None,
            min_interval: Duration::from_millis(25),
            event_capacity: 256,
        }
    }
}

impl From<&QueueConfig> for SchedulerSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            max_queued: cfg.max_queued,
            expiration: cfg.expiration(),
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            ..Default::default()
        }
    }
}

/// Per-unit options.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub priority: u8,
    /// Informational only: carried into `JobInfo` and events, never used
    /// for ordering or capacity.
    pub weight: u32,
    pub id: Option<String>,
    pub expiration: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            weight: 1,
            id: None,
            expiration: None,
        }
    }
}

impl JobOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self { priority, ..Default::default() }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub priority: u8,
    pub weight: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Pushed out by the queue's capacity limit.
    Overflow,
    /// Waited longer than its expiration.
    Expired,
    /// The scheduler was stopped or restarted while it waited.
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Queued { job: JobInfo, queued: usize },
    Started { job: JobInfo },
    Done { job: JobInfo, queued: usize },
    Failed { job: JobInfo, error: LiveError },
    Dropped { job: JobInfo, reason: DropReason },
    Restarted { generation: u64 },
}

/// How a unit of work ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    Done(T),
    Failed(LiveError),
    Dropped(DropReason),
}

impl<T> JobOutcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done(_))
    }

    /// Collapse into a `Result`, mapping drops onto the matching error.
    pub fn into_result(self, id: &str) -> Result<T> {
        match self {
            JobOutcome::Done(value) => Ok(value),
            JobOutcome::Failed(err) => Err(err),
            JobOutcome::Dropped(DropReason::Overflow) => {
                Err(LiveError::QueueOverflow { id: id.to_string() })
            }
            JobOutcome::Dropped(DropReason::Expired) => Err(LiveError::Expired { id: id.to_string() }),
            JobOutcome::Dropped(DropReason::Stopped) => Err(LiveError::SchedulerStopped),
        }
    }
}

/// Caller's end of a scheduled unit.
#[derive(Debug)]
pub struct JobHandle<T> {
    info: JobInfo,
    receiver: oneshot::Receiver<JobOutcome<T>>,
}

impl<T> JobHandle<T> {
    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub async fn outcome(self) -> JobOutcome<T> {
        self.receiver
            .await
            .unwrap_or(JobOutcome::Dropped(DropReason::Stopped))
    }

    pub async fn result(self) -> Result<T> {
        let id = self.info.id.clone();
        self.outcome().await.into_result(&id)
    }
}

trait ErasedJob: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
    fn drop_with(self: Box<Self>, reason: DropReason);
}

struct TypedJob<F, T> {
    future: F,
    reply: oneshot::Sender<JobOutcome<T>>,
}

impl<F, T> ErasedJob for TypedJob<F, T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let TypedJob { future, reply } = *self;
        Box::pin(async move {
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(LiveError::Panicked(panic_message(panic.as_ref()))),
            };
            match result {
                Ok(value) => {
                    let _ = reply.send(JobOutcome::Done(value));
                    Ok(())
                }
                Err(err) => {
                    let _ = reply.send(JobOutcome::Failed(err.clone()));
                    Err(err)
                }
            }
        })
    }

    fn drop_with(self: Box<Self>, reason: DropReason) {
        let _ = self.reply.send(JobOutcome::Dropped(reason));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct QueuedJob {
    info: JobInfo,
    queued_at: Instant,
    expiration: Option<Duration>,
    job: Box<dyn ErasedJob>,
}

#[derive(Default)]
struct QueueState {
    /// Keyed by (priority, arrival); the first entry runs next.
    waiting: BTreeMap<(u8, u64), QueuedJob>,
    running: Option<JobInfo>,
    stopped: bool,
}

impl QueueState {
    /// Oldest unit among the least urgent ones.
    fn leak_candidate(&self) -> Option<(u8, u64)> {
        let (&(priority, _), _) = self.waiting.last_key_value()?;
        self.waiting
            .range((priority, 0)..)
            .next()
            .map(|(key, _)| *key)
    }

    fn take_expired(&mut self, now: Instant) -> Vec<QueuedJob> {
        let expired: Vec<(u8, u64)> = self
            .waiting
            .iter()
            .filter(|(_, job)| {
                job.expiration
                    .is_some_and(|limit| now.duration_since(job.queued_at) > limit)
            })
            .map(|(key, _)| *key)
            .collect();
        expired
            .into_iter()
            .filter_map(|key| self.waiting.remove(&key))
            .collect()
    }
}

/// One worker lifetime. A restart replaces the whole generation.
struct Generation {
    id: u64,
    state: Mutex<QueueState>,
    wake: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Generation {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            worker: Mutex::new(None),
        }
    }
}

struct Shared {
    settings: SchedulerSettings,
    events: broadcast::Sender<QueueEvent>,
    current: Mutex<Arc<Generation>>,
    sequence: AtomicU64,
    generations: AtomicU64,
    shut_down: AtomicBool,
}

impl Shared {
    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn drop_job(&self, queued: QueuedJob, reason: DropReason) {
        tracing::warn!("Dropping job {} ({:?})", queued.info.id, reason);
        queued.job.drop_with(reason);
        self.emit(QueueEvent::Dropped { job: queued.info, reason });
    }

    /// Mark a generation stopped and drop everything still waiting in it.
    async fn halt(&self, generation: &Generation) {
        let drained = {
            let mut state = generation.state.lock().await;
            state.stopped = true;
            std::mem::take(&mut state.waiting)
        };
        for (_, queued) in drained {
            self.drop_job(queued, DropReason::Stopped);
        }
        generation.wake.notify_one();
    }
}

/// Swap in a fresh generation. The new worker waits for the old one to
/// finish its in-flight unit, so at most one unit ever runs.
async fn replace_generation(shared: &Arc<Shared>) -> u64 {
    let mut current = shared.current.lock().await;
    let old = current.clone();
    shared.halt(&old).await;
    let previous_worker = old.worker.lock().await.take();

    let id = shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
    let generation = Arc::new(Generation::new(id));
    let handle = tokio::spawn(run_worker(
        shared.clone(),
        generation.clone(),
        previous_worker,
    ));
    *generation.worker.lock().await = Some(handle);
    *current = generation;
    drop(current);

    tracing::info!("Command scheduler generation {} started", id);
    shared.emit(QueueEvent::Restarted { generation: id });
    id
}

/// Boxed: the worker and `replace_generation` are mutually recursive.
fn run_worker(
    shared: Arc<Shared>,
    generation: Arc<Generation>,
    previous: Option<JoinHandle<()>>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        let mut last_start: Option<Instant> = None;
        loop {
            if let Some(last) = last_start {
                tokio::time::sleep_until(last + shared.settings.min_interval).await;
            }
            let next = {
                let mut state = generation.state.lock().await;
                if state.stopped {
                    return;
                }
                for expired in state.take_expired(Instant::now()) {
                    shared.drop_job(expired, DropReason::Expired);
                }
                match state.waiting.pop_first() {
                    Some((_, queued)) => {
                        state.running = Some(queued.info.clone());
                        Some(queued)
                    }
                    None => None,
                }
            };
            let Some(queued) = next else {
                generation.wake.notified().await;
                continue;
            };

            let info = queued.info;
            tracing::debug!("Running job {} (priority {})", info.id, info.priority);
            shared.emit(QueueEvent::Started { job: info.clone() });
            last_start = Some(Instant::now());
            let result = queued.job.run().await;

            let remaining = {
                let mut state = generation.state.lock().await;
                state.running = None;
                state.waiting.len()
            };
            match result {
                Ok(()) => shared.emit(QueueEvent::Done { job: info, queued: remaining }),
                Err(err) if err.is_fatal() => {
                    tracing::error!("Job {} hit a fatal error: {}; restarting scheduler", info.id, err);
                    let error = if shared.shut_down.load(Ordering::SeqCst) {
                        LiveError::Device(format!("{} (restart failed: scheduler is stopped)", err))
                    } else {
                        let current = shared.current.lock().await.id;
                        if current == generation.id {
                            replace_generation(&shared).await;
                        }
                        err
                    };
                    shared.emit(QueueEvent::Failed { job: info, error });
                    return;
                }
                Err(err) => {
                    tracing::warn!("Job {} failed: {}", info.id, err);
                    shared.emit(QueueEvent::Failed { job: info, error: err });
                }
            }
        }
    })
}

/// Serial, prioritised executor for units of work.
///
/// Cloning gives another handle to the same queue. Needs a tokio runtime.
#[derive(Clone)]
pub struct CommandScheduler {
    shared: Arc<Shared>,
}

impl CommandScheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let generation = Arc::new(Generation::new(0));
        let shared = Arc::new(Shared {
            settings,
            events,
            current: Mutex::new(generation.clone()),
            sequence: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        });
        let handle = tokio::spawn(run_worker(shared.clone(), generation.clone(), None));
        // nothing else can reach this generation yet
        if let Ok(mut worker) = generation.worker.try_lock() {
            *worker = Some(handle);
        }
        Self { shared }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    /// Queue a unit of work. The returned handle resolves when the unit
    /// finishes or is dropped.
    pub async fn schedule<F, T>(&self, options: JobOptions, work: F) -> JobHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let info = JobInfo {
            id: options
                .id
                .unwrap_or_else(|| format!("job-{}", Uuid::new_v4())),
            priority: options.priority.min(MAX_PRIORITY),
            weight: options.weight,
        };
        let queued = QueuedJob {
            info: info.clone(),
            queued_at: Instant::now(),
            expiration: options.expiration.or(self.shared.settings.expiration),
            job: Box::new(TypedJob { future: work, reply }),
        };

        let current = self.shared.current.lock().await;
        let generation = current.clone();
        let mut state = generation.state.lock().await;
        drop(current);
        if state.stopped {
            drop(state);
            self.shared.drop_job(queued, DropReason::Stopped);
            return JobHandle { info, receiver };
        }
        let seq = self.shared.sequence.fetch_add(1, Ordering::SeqCst);
        state.waiting.insert((info.priority, seq), queued);
        self.shared.emit(QueueEvent::Queued {
            job: info.clone(),
            queued: state.waiting.len(),
        });
        while state.waiting.len() > self.shared.settings.max_queued {
            let Some(key) = state.leak_candidate() else {
                break;
            };
            if let Some(victim) = state.waiting.remove(&key) {
                self.shared.drop_job(victim, DropReason::Overflow);
            }
        }
        drop(state);
        generation.wake.notify_one();
        JobHandle { info, receiver }
    }

    /// Units waiting to run.
    pub async fn queued(&self) -> usize {
        let generation = self.shared.current.lock().await.clone();
        let state = generation.state.lock().await;
        state.waiting.len()
    }

    pub async fn running(&self) -> Option<JobInfo> {
        let generation = self.shared.current.lock().await.clone();
        let state = generation.state.lock().await;
        state.running.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    /// Resolve once everything queued before this call has run.
    pub async fn flush(&self) -> JobOutcome<()> {
        self.schedule(JobOptions::with_priority(MAX_PRIORITY).id("flush"), async { Ok(()) })
            .await
            .outcome()
            .await
    }

    /// Stop accepting work and drop what is waiting. A unit already
    /// running is allowed to finish.
    pub async fn stop(&self) {
        tracing::info!("Stopping command scheduler");
        self.shared.shut_down.store(true, Ordering::SeqCst);
        let generation = self.shared.current.lock().await.clone();
        self.shared.halt(&generation).await;
    }

    /// Drop everything waiting and start over with a fresh worker.
    /// Also brings a stopped scheduler back.
    pub async fn restart(&self) -> u64 {
        self.shared.shut_down.store(false, Ordering::SeqCst);
        replace_generation(&self.shared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_leak_drops_lowest_priority_oldest_first() {
        let mut state = QueueState::default();
        let noop = || -> Box<dyn ErasedJob> {
            Box::new(TypedJob {
                future: async { Ok::<(), LiveError>(()) },
                reply: oneshot::channel::<JobOutcome<()>>().0,
            })
        };
        for (priority, seq) in [(1u8, 0u64), (7, 1), (7, 2), (3, 3)] {
            state.waiting.insert(
                (priority, seq),
                QueuedJob {
                    info: JobInfo { id: seq.to_string(), priority, weight: 1 },
                    queued_at: Instant::now(),
                    expiration: None,
                    job: noop(),
                },
            );
        }
        assert_eq!(state.leak_candidate(), Some((7, 1)));
    }

    #[tokio::test]
    async fn test_outcome_into_result() {
        let dropped: JobOutcome<()> = JobOutcome::Dropped(DropReason::Overflow);
        assert_eq!(
            dropped.into_result("a"),
            Err(LiveError::QueueOverflow { id: "a".to_string() })
        );
        let stopped: JobOutcome<()> = JobOutcome::Dropped(DropReason::Stopped);
        assert_eq!(stopped.into_result("b"), Err(LiveError::SchedulerStopped));
    }

    async fn explode() -> Result<()> {
        panic!("bad listener")
    }

    #[tokio::test]
    async fn test_panic_reported_as_failure() {
        let (reply, receiver) = oneshot::channel::<JobOutcome<()>>();
        let job: Box<dyn ErasedJob> = Box::new(TypedJob { future: explode(), reply });
        let err = job.run().await.unwrap_err();
        assert_eq!(err, LiveError::Panicked("bad listener".to_string()));
        assert!(err.is_fatal());
        assert_eq!(receiver.await.unwrap(), JobOutcome::Failed(err));
    }
}
