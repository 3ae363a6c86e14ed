use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{JobDescriptor, SchedulerConfig, TriggerSpec};
use courier_scheduler::{JobRegistry, Scheduler};
use courier_testing_utils::{init_test_tracing, JobBehavior, ScriptedJob};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn every(name: &str, seconds: u64) -> JobDescriptor {
    JobDescriptor::new(name, TriggerSpec::every_seconds(seconds).unwrap())
}

fn scheduler_config(grace_seconds: u64) -> SchedulerConfig {
    SchedulerConfig {
        shutdown_grace_seconds: grace_seconds,
        ..SchedulerConfig::default()
    }
}

fn scheduler_for(jobs: Vec<(JobDescriptor, ScriptedJob)>, grace_seconds: u64) -> Scheduler {
    init_test_tracing();

    let mut registry = JobRegistry::new();
    for (descriptor, job) in jobs {
        registry.register(descriptor, Arc::new(job)).unwrap();
    }
    Scheduler::new(registry, &scheduler_config(grace_seconds))
}

#[tokio::test(start_paused = true)]
async fn test_long_running_job_never_overlaps() {
    let cleanup = ScriptedJob::new(Duration::from_secs(12));
    let scheduler = scheduler_for(vec![(every("cleanup", 5), cleanup.clone())], 60);

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_secs(61)).await;

    assert_eq!(cleanup.peak_concurrency(), 1);
    assert!(cleanup.runs() >= 3);

    let starts = cleanup.start_times();
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(12));
    }

    let stats = handle.stats();
    let job = &stats["cleanup"];
    assert_eq!(job.runs_started, cleanup.runs() as u64);
    assert!(job.skipped >= 1);
    assert!(job.last_fire.is_some());

    handle.shutdown_and_wait().await;
    assert_eq!(cleanup.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_interval_fire_after_one_interval() {
    let job = ScriptedJob::new(Duration::ZERO);
    let scheduler = scheduler_for(vec![(every("refresh", 10), job.clone())], 5);
    let started = Instant::now();

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_secs(9)).await;
    assert_eq!(job.runs(), 0);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(job.runs(), 1);
    assert!(job.start_times()[0] - started >= Duration::from_secs(10));

    handle.shutdown_and_wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_job_keeps_firing() {
    let failing = ScriptedJob::new(Duration::ZERO).with_behavior(JobBehavior::Fail);
    let scheduler = scheduler_for(vec![(every("import-profiles", 1), failing.clone())], 5);

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_millis(5500)).await;

    let stats = handle.stats();
    let job = &stats["import-profiles"];
    assert!(job.runs_started >= 4);
    assert_eq!(job.failed, job.runs_started);
    assert_eq!(job.completed, 0);
    assert!(!job.running);

    handle.shutdown_and_wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_panicking_job_is_isolated() {
    let panicking = ScriptedJob::new(Duration::ZERO).with_behavior(JobBehavior::Panic);
    let healthy = ScriptedJob::new(Duration::ZERO);
    let scheduler = scheduler_for(
        vec![
            (every("broken", 1), panicking.clone()),
            (every("healthy", 1), healthy.clone()),
        ],
        5,
    );

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_millis(3500)).await;

    assert!(panicking.runs() >= 3);
    assert!(healthy.runs() >= 3);

    let stats = handle.stats();
    assert_eq!(stats["broken"].failed, stats["broken"].runs_started);
    assert_eq!(stats["healthy"].completed, stats["healthy"].runs_started);

    handle.shutdown_and_wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_run_finish() {
    let job = ScriptedJob::new(Duration::from_secs(3));
    let scheduler = scheduler_for(vec![(every("report", 1), job.clone())], 60);

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(job.active(), 1);

    handle.shutdown_and_wait().await;

    assert_eq!(job.runs(), 1);
    assert_eq!(job.completed(), 1);
    assert_eq!(job.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_firing() {
    let job = ScriptedJob::new(Duration::ZERO);
    let scheduler = scheduler_for(vec![(every("report", 1), job.clone())], 5);
    let shutdown = CancellationToken::new();

    let handle = scheduler.start(&shutdown);
    sleep(Duration::from_millis(2500)).await;
    shutdown.cancel();
    handle.wait().await;

    let runs = job.runs();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(job.runs(), runs);
}

#[tokio::test(start_paused = true)]
async fn test_grace_period_expiry_aborts_run() {
    let job = ScriptedJob::new(Duration::from_secs(600));
    let scheduler = scheduler_for(vec![(every("rebuild", 1), job.clone())], 2);

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_millis(1500)).await;

    let shutdown_started = Instant::now();
    handle.shutdown_and_wait().await;

    assert!(shutdown_started.elapsed() < Duration::from_secs(10));
    assert_eq!(job.completed(), 0);
    assert!(!scheduler.guards().is_running("rebuild"));
}

#[tokio::test(start_paused = true)]
async fn test_job_context_carries_run_number() {
    init_test_tracing();
    let last_run = Arc::new(AtomicU64::new(0));
    let observed = last_run.clone();

    let mut registry = JobRegistry::new();
    registry
        .register_fn(every("dedup-sweep", 2), move |ctx| {
            let observed = observed.clone();
            async move {
                assert_eq!(ctx.job_name, "dedup-sweep");
                observed.store(ctx.run_number, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    let scheduler = Scheduler::new(registry, &scheduler_config(5));

    let handle = scheduler.start(&CancellationToken::new());
    sleep(Duration::from_millis(6500)).await;

    assert_eq!(last_run.load(Ordering::SeqCst), 3);
    handle.shutdown_and_wait().await;
}

#[tokio::test]
async fn test_next_fire_times_for_cron_job() {
    let mut registry = JobRegistry::new();
    registry
        .register_fn(
            JobDescriptor::new(
                "update-profile-inventory-values",
                TriggerSpec::cron("0 45 * * * *", chrono_tz::UTC).unwrap(),
            ),
            |_ctx| async { Ok(()) },
        )
        .unwrap();
    let scheduler = Scheduler::new(registry, &SchedulerConfig::default());

    let times = scheduler
        .next_fire_times("update-profile-inventory-values", 3)
        .unwrap();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], chrono::Duration::hours(1));
    }
    assert!(times.iter().all(|time| chrono::Timelike::minute(time) == 45));
}
