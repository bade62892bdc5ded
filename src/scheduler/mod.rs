// src/scheduler/mod.rs - Command queue and timed task scheduler
pub mod command_queue;
pub mod task_scheduler;

pub use command_queue::{
    CommandScheduler, DropReason, JobHandle, JobInfo, JobOptions, JobOutcome, QueueEvent,
    SchedulerSettings,
};
pub use task_scheduler::{Task, TaskEvent, TaskInfo, TaskScheduler};
