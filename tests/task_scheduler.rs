// Integration tests for the timed task scheduler running on its own ticker

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use liveprint_rs::LiveError;
use liveprint_rs::config::TaskConfig;
use liveprint_rs::scheduler::{Task, TaskEvent, TaskScheduler};

fn counter(name: &str, every_ms: u64, hits: &Arc<AtomicUsize>) -> Task {
    let hits = hits.clone();
    Task::new(name, Duration::from_millis(every_ms), move |_| {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_repeating_task_runs_on_ticker() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let hits = Arc::new(AtomicUsize::new(0));
    scheduler.start().await;
    scheduler.schedule(counter("blink", 100, &hits).repeating()).await;

    tokio::time::sleep(Duration::from_millis(350)).await;
    let seen = hits.load(Ordering::SeqCst);
    assert!((3..=4).contains(&seen), "ran {} times", seen);

    scheduler.remove("blink").await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let frozen = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), frozen);
    assert!(scheduler.tasks().await.is_empty());
    scheduler.stop().await;
}

#[tokio::test]
async fn test_same_name_replaces_task() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let mut events = scheduler.subscribe();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    scheduler.schedule(counter("pulse", 1000, &first).repeating()).await;
    for run in scheduler.run_due(Duration::ZERO).await {
        run.await.unwrap();
    }
    scheduler.schedule(counter("pulse", 500, &second).repeating()).await;
    for run in scheduler.run_due(Duration::from_millis(10)).await {
        run.await.unwrap();
    }

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    let info = scheduler.get("pulse").await.unwrap();
    assert_eq!(info.delay, Duration::from_millis(500));
    assert_eq!(info.target, Duration::from_millis(510));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            TaskEvent::EventAdded { name: "pulse".into() },
            TaskEvent::EventRun { name: "pulse".into(), time: Duration::ZERO },
            TaskEvent::EventRemoved { name: "pulse".into() },
            TaskEvent::EventAdded { name: "pulse".into() },
            TaskEvent::EventRun { name: "pulse".into(), time: Duration::from_millis(10) },
        ]
    );
}

#[tokio::test]
async fn test_system_tasks_run_silently_and_survive_user_clear() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let mut events = scheduler.subscribe();
    let hits = Arc::new(AtomicUsize::new(0));
    scheduler
        .schedule(counter("poll", 100, &hits).repeating().system())
        .await;
    for run in scheduler.run_due(Duration::ZERO).await {
        run.await.unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(events.try_recv().unwrap(), TaskEvent::EventAdded { name: "poll".into() });
    assert!(events.try_recv().is_err());

    scheduler.clear_user_tasks().await;
    assert!(scheduler.get("poll").await.is_some());

    scheduler.clear().await;
    assert!(scheduler.tasks().await.is_empty());
    assert_eq!(events.try_recv().unwrap(), TaskEvent::EventsCleared);
}

#[tokio::test]
async fn test_failing_task_keeps_repeating() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let flaky = Task::new("flaky", Duration::from_millis(50), move |_| {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(LiveError::Device("no reply".to_string()))
        }
    })
    .repeating();
    scheduler.schedule(flaky).await;

    for now in [0, 50, 100] {
        for run in scheduler.run_due(Duration::from_millis(now)).await {
            run.await.unwrap();
        }
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(
        scheduler.get("flaky").await.unwrap().target,
        Duration::from_millis(150)
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_task_never_overlaps_itself() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let task = {
        let (runs, active, peak) = (runs.clone(), active.clone(), peak.clone());
        Task::new("slow", Duration::from_millis(10), move |_| {
            let (runs, active, peak) = (runs.clone(), active.clone(), peak.clone());
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .repeating()
    };
    scheduler.start().await;
    scheduler.schedule(task).await;

    tokio::time::sleep(Duration::from_millis(450)).await;
    scheduler.stop().await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(runs.load(Ordering::SeqCst) >= 3, "ran {} times", runs.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_ticker_exits_when_scheduler_dropped() {
    let scheduler = TaskScheduler::new(&TaskConfig::default());
    let hits = Arc::new(AtomicUsize::new(0));
    scheduler.start().await;
    scheduler.schedule(counter("blink", 20, &hits).repeating()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(hits.load(Ordering::SeqCst) > 0);

    drop(scheduler);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(hits.load(Ordering::SeqCst), frozen);
    // the task, and with it its clone of the counter, is gone
    assert_eq!(Arc::strong_count(&hits), 1);
}
