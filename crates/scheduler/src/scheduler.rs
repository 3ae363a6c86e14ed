//! 作业调度器
//!
//! 每个作业一个驱动任务：等待下一个触发时刻 -> 尝试获取防重叠锁 -> 成功则在独立任务中运行执行体，
//! 失败则跳过本次触发并计数。执行体的错误与 panic 在任务边界被捕获，不会影响驱动任务。
//!
//! 关闭流程：停止触发 -> 在宽限期内等待在途执行体 -> 超时后中止剩余执行体。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{Job, JobContext, SchedulerConfig};
use courier_infrastructure::{MetricsCollector, StructuredLogger};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cron_utils::CronScheduler;
use crate::job_registry::{JobRegistry, RegisteredJob};
use crate::overlap_guard::{JobRunGuard, OverlapGuards};
use crate::trigger::JobTrigger;

/// 单个作业的运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub runs_started: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub last_fire: Option<DateTime<Utc>>,
    pub next_fire: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Default)]
struct FireTimes {
    last_fire: Option<DateTime<Utc>>,
    next_fire: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct JobCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    times: Mutex<FireTimes>,
}

impl JobCounters {
    fn update_times(&self, update: impl FnOnce(&mut FireTimes)) {
        let mut times = self.times.lock().unwrap_or_else(|p| p.into_inner());
        update(&mut times);
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .next_fire
    }

    fn snapshot(&self, running: bool) -> JobStats {
        let times = self.times.lock().unwrap_or_else(|p| p.into_inner());
        JobStats {
            runs_started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_fire: times.last_fire,
            next_fire: times.next_fire,
            running,
        }
    }
}

type StatsMap = Arc<DashMap<String, Arc<JobCounters>>>;

fn collect_stats(stats: &StatsMap, guards: &OverlapGuards) -> HashMap<String, JobStats> {
    stats
        .iter()
        .map(|entry| {
            let running = guards.is_running(entry.key());
            (entry.key().clone(), entry.value().snapshot(running))
        })
        .collect()
}

/// 作业调度器
pub struct Scheduler {
    registry: JobRegistry,
    guards: Arc<OverlapGuards>,
    shutdown_grace: Duration,
    metrics: MetricsCollector,
    stats: StatsMap,
}

impl Scheduler {
    pub fn new(registry: JobRegistry, config: &SchedulerConfig) -> Self {
        let stats: StatsMap = Arc::new(DashMap::new());
        for name in registry.names() {
            stats.insert(name.to_string(), Arc::new(JobCounters::default()));
        }

        Self {
            registry,
            guards: Arc::new(OverlapGuards::new()),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
            metrics: MetricsCollector::new(),
            stats,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn guards(&self) -> Arc<OverlapGuards> {
        self.guards.clone()
    }

    pub fn stats(&self) -> HashMap<String, JobStats> {
        collect_stats(&self.stats, &self.guards)
    }

    /// 预测作业接下来的 `count` 个触发时刻，未注册的作业返回 `None`
    pub fn next_fire_times(&self, name: &str, count: usize) -> Option<Vec<DateTime<Utc>>> {
        let job = self.registry.get(name)?;
        let now = Utc::now();
        let scheduled = self
            .stats
            .get(name)
            .and_then(|counters| counters.next_fire())
            .filter(|next| *next > now);

        let times = match scheduled {
            Some(next) if count > 0 => {
                let mut times = vec![next];
                times.extend(job.trigger.upcoming(next, count - 1));
                times
            }
            _ => job.trigger.upcoming(now, count),
        };
        Some(times)
    }

    /// 为每个作业启动驱动任务
    pub fn start(&self, shutdown: &CancellationToken) -> SchedulerHandle {
        let shutdown = shutdown.child_token();
        let mut tasks = Vec::with_capacity(self.registry.len());

        for job in self.registry.jobs() {
            let counters = self
                .stats
                .entry(job.descriptor.name.clone())
                .or_default()
                .clone();

            let driver = JobDriver {
                job: job.clone(),
                guards: self.guards.clone(),
                metrics: self.metrics.clone(),
                counters,
                shutdown_grace: self.shutdown_grace,
            };
            debug!(
                "Scheduling job {} with trigger {}",
                job.descriptor.name,
                describe_trigger(&job.trigger)
            );
            tasks.push(tokio::spawn(driver.run(shutdown.clone())));
        }

        info!("Scheduler started with {} job(s)", tasks.len());

        SchedulerHandle {
            tasks,
            shutdown,
            stats: self.stats.clone(),
            guards: self.guards.clone(),
        }
    }

    /// 运行直到 `shutdown` 被取消，返回前等待在途执行体（受宽限期约束）
    pub async fn run(&self, shutdown: CancellationToken) {
        self.start(&shutdown).wait().await;
    }
}

fn describe_trigger(trigger: &JobTrigger) -> String {
    match trigger {
        JobTrigger::Interval(interval) => format!("every {:?}", interval),
        JobTrigger::Cron(cron) => format!("cron '{}' ({})", cron.expression(), cron.time_zone()),
    }
}

/// 运行中的调度器句柄
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
    stats: StatsMap,
    guards: Arc<OverlapGuards>,
}

impl SchedulerHandle {
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> HashMap<String, JobStats> {
        collect_stats(&self.stats, &self.guards)
    }

    pub fn job_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Job driver task failed: {}", e);
            }
        }
        info!("Scheduler stopped");
    }

    pub async fn shutdown_and_wait(self) {
        self.shutdown();
        self.wait().await;
    }
}

struct JobDriver {
    job: RegisteredJob,
    guards: Arc<OverlapGuards>,
    metrics: MetricsCollector,
    counters: Arc<JobCounters>,
    shutdown_grace: Duration,
}

impl JobDriver {
    async fn run(self, shutdown: CancellationToken) {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        match self.job.trigger.clone() {
            JobTrigger::Interval(interval) => {
                self.drive_interval(interval, &mut in_flight, &shutdown)
                    .await
            }
            JobTrigger::Cron(cron) => self.drive_cron(&cron, &mut in_flight, &shutdown).await,
        }

        self.counters.update_times(|times| times.next_fire = None);
        self.drain(in_flight).await;
    }

    /// 首次触发在启动后一个间隔处，之后每隔一个间隔触发
    async fn drive_interval(
        &self,
        interval: Duration,
        in_flight: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let first = self.job.trigger.next_fire_after(Utc::now());
        self.counters.update_times(|times| times.next_fire = first);

        loop {
            reap(in_flight);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fired_at = Utc::now();
            let next = self.job.trigger.next_fire_after(fired_at);
            self.counters.update_times(|times| times.next_fire = next);
            self.fire(fired_at, in_flight, shutdown);
        }
    }

    /// 错过的CRON时刻不补跑，唤醒后从当前时间重新计算
    async fn drive_cron(
        &self,
        cron: &CronScheduler,
        in_flight: &mut JoinSet<()>,
        shutdown: &CancellationToken,
    ) {
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            reap(in_flight);

            let now = Utc::now();
            // 定时器可能略早唤醒，以上次触发时刻为下界避免同一时刻触发两次
            let from = match last_fire {
                Some(last) if last > now => last,
                _ => now,
            };
            let Some(next) = cron.next_after(from) else {
                error!(
                    "Cron schedule for job {} has no upcoming fire time, stopping",
                    self.job.descriptor.name
                );
                break;
            };
            self.counters.update_times(|times| times.next_fire = Some(next));

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            last_fire = Some(next);
            self.fire(next, in_flight, shutdown);
        }
    }

    fn fire(&self, fired_at: DateTime<Utc>, in_flight: &mut JoinSet<()>, shutdown: &CancellationToken) {
        let name = &self.job.descriptor.name;

        let Some(guard) = self.guards.try_acquire(name) else {
            let skipped = self.counters.skipped.fetch_add(1, Ordering::Relaxed) + 1;
            self.metrics.record_job_skipped(name);
            StructuredLogger::log_job_overlap_skipped(name, fired_at, skipped);
            return;
        };

        let run_number = self.counters.started.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .update_times(|times| times.last_fire = Some(fired_at));

        let context = JobContext {
            job_name: name.clone(),
            run_number,
            fired_at,
            cancellation: shutdown.child_token(),
        };

        in_flight.spawn(execute(
            self.job.body.clone(),
            context,
            guard,
            self.counters.clone(),
            self.metrics.clone(),
        ));
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        let name = &self.job.descriptor.name;
        if in_flight.is_empty() {
            debug!("Job {} stopped with nothing in flight", name);
            return;
        }

        info!(
            "Waiting up to {:?} for in-flight run of job {}",
            self.shutdown_grace, name
        );
        let finished = tokio::time::timeout(self.shutdown_grace, async {
            while let Some(result) = in_flight.join_next().await {
                log_join_result(name, result);
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                "Job {} still running after {:?}, aborting",
                name, self.shutdown_grace
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }
    }
}

fn reap(in_flight: &mut JoinSet<()>) {
    while let Some(result) = in_flight.try_join_next() {
        if let Err(e) = result {
            error!("Job task failed: {}", e);
        }
    }
}

fn log_join_result(job_name: &str, result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("Job {} task failed: {}", job_name, e);
    }
}

/// 执行一次作业；守卫在统计与日志写完之后才释放
async fn execute(
    body: Arc<dyn Job>,
    context: JobContext,
    guard: JobRunGuard,
    counters: Arc<JobCounters>,
    metrics: MetricsCollector,
) {
    let _guard = guard;
    let job_name = context.job_name.clone();
    let run_number = context.run_number;

    StructuredLogger::log_job_started(&job_name, run_number, context.fired_at);
    let started = Instant::now();

    let outcome = AssertUnwindSafe(body.run(context)).catch_unwind().await;
    let elapsed = started.elapsed();
    let duration_ms = elapsed.as_millis() as u64;

    let error_message = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{:#}", e)),
        Err(panic) => Some(format!("job panicked: {}", panic_message(panic.as_ref()))),
    };

    match error_message {
        None => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            metrics.record_job_run(&job_name, true, elapsed.as_secs_f64());
            StructuredLogger::log_job_completed(&job_name, run_number, duration_ms);
        }
        Some(message) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics.record_job_run(&job_name, false, elapsed.as_secs_f64());
            StructuredLogger::log_job_failed(&job_name, run_number, duration_ms, &message);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{job_fn, JobDescriptor, TriggerSpec};

    fn scheduler_with(name: &str, seconds: u64) -> Scheduler {
        let mut registry = JobRegistry::new();
        registry
            .register_fn(
                JobDescriptor::new(name, TriggerSpec::every_seconds(seconds).unwrap()),
                |_ctx| async { Ok(()) },
            )
            .unwrap();
        Scheduler::new(registry, &SchedulerConfig::default())
    }

    #[test]
    fn test_stats_initialized_for_registered_jobs() {
        let scheduler = scheduler_with("cleanup", 5);
        let stats = scheduler.stats();

        assert_eq!(stats.len(), 1);
        assert_eq!(stats["cleanup"], JobStats::default());
    }

    #[test]
    fn test_next_fire_times_before_start() {
        let scheduler = scheduler_with("cleanup", 5);
        let before = Utc::now();

        let times = scheduler.next_fire_times("cleanup", 3).unwrap();
        assert_eq!(times.len(), 3);
        assert!(times[0] > before);
        assert_eq!(times[1] - times[0], chrono::Duration::seconds(5));
        assert_eq!(times[2] - times[1], chrono::Duration::seconds(5));
        assert!(scheduler.next_fire_times("unknown", 3).is_none());
    }

    #[tokio::test]
    async fn test_execute_records_failure_and_releases_guard() {
        let guards = OverlapGuards::new();
        let counters = Arc::new(JobCounters::default());
        let body: Arc<dyn Job> = Arc::new(job_fn(|_ctx| async { Err::<(), _>(anyhow::anyhow!("boom")) }));
        let context = JobContext {
            job_name: "cleanup".to_string(),
            run_number: 1,
            fired_at: Utc::now(),
            cancellation: CancellationToken::new(),
        };

        let guard = guards.try_acquire("cleanup").unwrap();
        execute(body, context, guard, counters.clone(), MetricsCollector::new()).await;

        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.completed.load(Ordering::Relaxed), 0);
        assert!(!guards.is_running("cleanup"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
    }
}
