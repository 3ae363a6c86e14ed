//! 消息分发器
//!
//! 每个目标一条接收循环：接收 -> 解析路由 -> 去重 -> 获取并发槽位 -> 调用处理器 -> 结算。
//! 槽位在接收循环中获取，槽位耗尽时循环停止拉取新消息，形成背压；
//! 处理器在独立任务中运行并持有槽位，处理器返回后先归还槽位再结算。
//!
//! 关闭流程：停止拉取 -> 在宽限期内等待在途处理器 -> 超时后取消剩余处理器并放弃其投递。

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    CourierError, Delivery, DeliverySettler, DeliveryStream, Destination, DispatcherConfig,
    HandlerError, HandlerResult, MessageBroker, MessageContext, MessageEnvelope, Result,
    RouteDescriptor, RouteRegistry, Settlement,
};
use courier_infrastructure::{MetricsCollector, StructuredLogger};
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::concurrency_limiter::{ConcurrencyLimiter, ConcurrencySlot};
use crate::dedup_store::DedupStore;
use crate::handler_registry::{DynHandler, HandlerRegistry};
use crate::retry_policy::{RetryDecision, RetryPolicy};

/// 取消剩余处理器后等待其结算的上限
const CANCEL_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// 单个目标的分发统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub received: u64,
    pub duplicates: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct DestinationCounters {
    received: AtomicU64,
    duplicates: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    abandoned: AtomicU64,
}

impl DestinationCounters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            received: self.received.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

type StatsMap = Arc<DashMap<String, Arc<DestinationCounters>>>;

fn collect_stats(stats: &StatsMap) -> HashMap<String, DispatcherStats> {
    stats
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().snapshot()))
        .collect()
}

/// 分发器：持有路由表、处理器分发表以及共享的去重与并发状态
pub struct MessageDispatcher {
    broker: Arc<dyn MessageBroker>,
    routes: Arc<RouteRegistry>,
    handlers: Arc<HandlerRegistry>,
    dedup: Arc<DedupStore>,
    limiter: Arc<ConcurrencyLimiter>,
    retry_policy: RetryPolicy,
    subscription_name: String,
    shutdown_grace: Duration,
    metrics: MetricsCollector,
    stats: StatsMap,
}

impl MessageDispatcher {
    /// 创建分发器并做启动校验：每个注册了处理器的类型都必须有路由
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        routes: Arc<RouteRegistry>,
        handlers: HandlerRegistry,
        config: &DispatcherConfig,
    ) -> Result<Self> {
        handlers.validate(&routes)?;

        Ok(Self {
            broker,
            routes,
            handlers: Arc::new(handlers),
            dedup: Arc::new(DedupStore::new()),
            limiter: Arc::new(ConcurrencyLimiter::new()),
            retry_policy: RetryPolicy::from_config(config),
            subscription_name: config.subscription_name.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
            metrics: MetricsCollector::new(),
            stats: Arc::new(DashMap::new()),
        })
    }

    pub fn with_dedup_store(mut self, dedup: Arc<DedupStore>) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn dedup_store(&self) -> Arc<DedupStore> {
        self.dedup.clone()
    }

    pub fn limiter(&self) -> Arc<ConcurrencyLimiter> {
        self.limiter.clone()
    }

    /// 需要消费的目标：至少有一个已注册处理器的类型路由到该目标
    pub fn consumed_destinations(&self) -> Vec<Destination> {
        self.routes
            .destinations()
            .into_iter()
            .filter(|destination| {
                self.routes
                    .types_for_destination(&destination.name)
                    .iter()
                    .any(|type_name| self.handlers.contains(type_name))
            })
            .collect()
    }

    pub fn stats(&self) -> HashMap<String, DispatcherStats> {
        collect_stats(&self.stats)
    }

    /// 订阅全部目标并为每个目标启动接收循环
    pub async fn start(&self, shutdown: &CancellationToken) -> Result<DispatcherHandle> {
        let shutdown = shutdown.child_token();
        let mut tasks = Vec::new();

        for destination in self.consumed_destinations() {
            let max_concurrency = self
                .routes
                .max_concurrency_for(&destination.name)
                .unwrap_or(1);

            let stream = self
                .broker
                .subscribe(&destination, &self.subscription_name)
                .await?;

            let counters = self
                .stats
                .entry(destination.name.clone())
                .or_default()
                .clone();

            let consumer = DestinationConsumer {
                shared: Arc::new(ConsumerShared {
                    destination,
                    max_concurrency,
                    routes: self.routes.clone(),
                    handlers: self.handlers.clone(),
                    dedup: self.dedup.clone(),
                    limiter: self.limiter.clone(),
                    retry_policy: self.retry_policy.clone(),
                    metrics: self.metrics.clone(),
                    counters,
                }),
                shutdown_grace: self.shutdown_grace,
            };

            StructuredLogger::log_consumer_started(
                &consumer.shared.destination.name,
                &self.subscription_name,
                max_concurrency,
            );
            tasks.push(tokio::spawn(consumer.run(stream, shutdown.clone())));
        }

        info!("Dispatcher started with {} consumer loop(s)", tasks.len());

        Ok(DispatcherHandle {
            tasks,
            shutdown,
            stats: self.stats.clone(),
        })
    }
}

/// 运行中的分发器句柄
pub struct DispatcherHandle {
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
    stats: StatsMap,
}

impl DispatcherHandle {
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn stats(&self) -> HashMap<String, DispatcherStats> {
        collect_stats(&self.stats)
    }

    pub fn loop_count(&self) -> usize {
        self.tasks.len()
    }

    /// 等待所有接收循环退出（每个循环自行完成宽限期内的排空）
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Consumer loop task failed: {}", e);
            }
        }
    }

    pub async fn shutdown_and_wait(self) {
        self.shutdown();
        self.wait().await;
    }
}

struct ConsumerShared {
    destination: Destination,
    max_concurrency: usize,
    routes: Arc<RouteRegistry>,
    handlers: Arc<HandlerRegistry>,
    dedup: Arc<DedupStore>,
    limiter: Arc<ConcurrencyLimiter>,
    retry_policy: RetryPolicy,
    metrics: MetricsCollector,
    counters: Arc<DestinationCounters>,
}

struct DestinationConsumer {
    shared: Arc<ConsumerShared>,
    shutdown_grace: Duration,
}

impl DestinationConsumer {
    async fn run(self, mut stream: DeliveryStream, shutdown: CancellationToken) {
        let handler_cancel = CancellationToken::new();
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(result) = in_flight.try_join_next() {
                log_task_result(&self.shared.destination, result);
            }

            let delivery = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        warn!("Delivery stream for {} ended", self.shared.destination);
                        break;
                    }
                },
            };

            self.process(delivery, &mut in_flight, &shutdown, &handler_cancel)
                .await;
        }

        drop(stream);
        self.drain(in_flight, handler_cancel).await;
    }

    async fn process(
        &self,
        delivery: Delivery,
        in_flight: &mut JoinSet<()>,
        shutdown: &CancellationToken,
        handler_cancel: &CancellationToken,
    ) {
        let shared = &self.shared;
        let Delivery {
            envelope,
            attempt,
            settler,
        } = delivery;
        let destination = shared.destination.name.as_str();

        shared.counters.received.fetch_add(1, Ordering::Relaxed);
        shared.metrics.record_message_received(destination);
        StructuredLogger::log_message_received(&envelope.id, &envelope.type_name, destination, attempt);

        let route = match shared.routes.resolve(&envelope.type_name) {
            Ok(route) => route.clone(),
            Err(e) => {
                shared.dead_letter(settler, &envelope, attempt, e.to_string()).await;
                return;
            }
        };

        let handler = match shared.handlers.get(&envelope.type_name) {
            Some(handler) => handler,
            None => {
                let reason = CourierError::MissingHandler {
                    type_name: envelope.type_name.clone(),
                }
                .to_string();
                shared.dead_letter(settler, &envelope, attempt, reason).await;
                return;
            }
        };

        let dedup_key = DedupStore::key_for(&envelope.type_name, &envelope.id);
        if route.dedup_enabled() && !shared.dedup.try_admit(&dedup_key, route.duplicate_window) {
            shared.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            shared.metrics.record_duplicate(destination);
            StructuredLogger::log_duplicate_suppressed(&envelope.id, &envelope.type_name, destination);
            settle(settler, Settlement::Ack, &envelope.id).await;
            return;
        }

        let slot = match shared
            .limiter
            .acquire(destination, shared.max_concurrency, shutdown)
            .await
        {
            Ok(slot) => slot,
            Err(_) => {
                // 关闭期间等待槽位被取消：撤销去重记录并放弃本次投递，交还代理重新入队
                shared.dedup.forget(&dedup_key);
                shared.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                debug!("Acquire cancelled, abandoning message {}", envelope.id);
                settle(settler, Settlement::Abandon, &envelope.id).await;
                return;
            }
        };
        shared
            .metrics
            .update_in_flight(destination, shared.limiter.in_flight(destination));

        let execution = Execution {
            shared: shared.clone(),
            envelope,
            attempt,
            settler,
            route,
            handler,
            dedup_key,
            slot,
            cancellation: handler_cancel.child_token(),
        };
        in_flight.spawn(execution.run());
    }

    async fn drain(&self, mut in_flight: JoinSet<()>, handler_cancel: CancellationToken) {
        let total = in_flight.len();
        let grace = self.shutdown_grace;

        let finished = tokio::time::timeout(grace, async {
            while let Some(result) = in_flight.join_next().await {
                log_task_result(&self.shared.destination, result);
            }
        })
        .await;

        let mut aborted = 0;
        if finished.is_err() {
            aborted = in_flight.len();
            warn!(
                "{} handler(s) on {} still running after {:?}, cancelling",
                aborted, self.shared.destination, grace
            );
            handler_cancel.cancel();

            let settled = tokio::time::timeout(CANCEL_SETTLE_TIMEOUT, async {
                while let Some(result) = in_flight.join_next().await {
                    log_task_result(&self.shared.destination, result);
                }
            })
            .await;

            if settled.is_err() {
                in_flight.abort_all();
                while in_flight.join_next().await.is_some() {}
            }
        }

        StructuredLogger::log_consumer_stopped(
            &self.shared.destination.name,
            total - aborted,
            aborted,
        );
    }
}

impl ConsumerShared {
    async fn dead_letter(
        &self,
        settler: Box<dyn DeliverySettler>,
        envelope: &MessageEnvelope,
        attempt: u32,
        reason: String,
    ) {
        let destination = self.destination.name.as_str();
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_dead_letter(destination);
        StructuredLogger::log_message_dead_lettered(
            &envelope.id,
            &envelope.type_name,
            destination,
            attempt,
            &reason,
        );
        settle(settler, Settlement::DeadLetter { reason }, &envelope.id).await;
    }
}

/// 一次处理器调用，持有并发槽位直到处理器返回
struct Execution {
    shared: Arc<ConsumerShared>,
    envelope: MessageEnvelope,
    attempt: u32,
    settler: Box<dyn DeliverySettler>,
    route: RouteDescriptor,
    handler: Arc<dyn DynHandler>,
    dedup_key: String,
    slot: ConcurrencySlot,
    cancellation: CancellationToken,
}

impl Execution {
    async fn run(self) {
        let Execution {
            shared,
            envelope,
            attempt,
            settler,
            route,
            handler,
            dedup_key,
            slot,
            cancellation,
        } = self;
        let destination = shared.destination.name.as_str();

        let context = MessageContext {
            message_id: envelope.id.clone(),
            type_name: envelope.type_name.clone(),
            destination: shared.destination.clone(),
            enqueued_at: envelope.enqueued_at,
            attempt,
            max_attempts: shared.retry_policy.max_attempts,
            properties: envelope.properties.clone(),
            cancellation: cancellation.clone(),
        };

        let started = Instant::now();
        let outcome: Option<HandlerResult> = tokio::select! {
            biased;
            result = AssertUnwindSafe(handler.invoke(&envelope, context)).catch_unwind() => {
                Some(result.unwrap_or_else(|panic| {
                    Err(HandlerError::Failed(format!("处理器发生panic: {}", panic_message(panic.as_ref()))))
                }))
            }
            _ = cancellation.cancelled() => None,
        };
        let elapsed = started.elapsed();

        // 结算可能重新入队到本目标，必须先让接收循环拿回槽位
        drop(slot);
        shared
            .metrics
            .update_in_flight(destination, shared.limiter.in_flight(destination));

        let settlement = match outcome {
            None => {
                shared.dedup.forget(&dedup_key);
                shared.counters.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Handler for message {} on {} cancelled during shutdown",
                    envelope.id, shared.destination
                );
                Settlement::Abandon
            }
            Some(Ok(())) => {
                shared.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                shared.metrics.record_handler_execution(
                    destination,
                    &envelope.type_name,
                    true,
                    elapsed.as_secs_f64(),
                );
                StructuredLogger::log_message_completed(
                    &envelope.id,
                    &envelope.type_name,
                    destination,
                    attempt,
                    elapsed.as_millis() as u64,
                );
                Settlement::Ack
            }
            Some(Err(err)) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                shared.metrics.record_handler_execution(
                    destination,
                    &envelope.type_name,
                    false,
                    elapsed.as_secs_f64(),
                );
                StructuredLogger::log_handler_failed(
                    &envelope.id,
                    &envelope.type_name,
                    destination,
                    attempt,
                    shared.retry_policy.max_attempts,
                    &err.to_string(),
                );

                match shared.retry_policy.decide(attempt, &err) {
                    RetryDecision::Retry { delay } => {
                        // 重投需要再次通过去重检查，这里撤销本次记录
                        if route.dedup_enabled() {
                            shared.dedup.forget(&dedup_key);
                        }
                        shared.counters.retried.fetch_add(1, Ordering::Relaxed);
                        shared.metrics.record_retry(destination);
                        StructuredLogger::log_message_retry(
                            &envelope.id,
                            &envelope.type_name,
                            destination,
                            attempt,
                            delay.as_millis() as u64,
                        );
                        Settlement::Retry { delay }
                    }
                    RetryDecision::DeadLetter { reason } => {
                        shared.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                        shared.metrics.record_dead_letter(destination);
                        StructuredLogger::log_message_dead_lettered(
                            &envelope.id,
                            &envelope.type_name,
                            destination,
                            attempt,
                            &reason,
                        );
                        Settlement::DeadLetter { reason }
                    }
                }
            }
        };

        settle(settler, settlement, &envelope.id).await;
    }
}

async fn settle(settler: Box<dyn DeliverySettler>, settlement: Settlement, message_id: &str) {
    let kind = settlement.as_str();
    if let Err(e) = settler.settle(settlement).await {
        error!("Failed to settle message {} as {}: {}", message_id, kind, e);
    }
}

fn log_task_result(destination: &Destination, result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!("Handler task on {} failed: {}", destination, e);
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
