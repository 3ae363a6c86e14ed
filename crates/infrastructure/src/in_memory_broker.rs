use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
    config::BrokerConfig, CourierError, Delivery, DeliverySettler, DeliveryStream, Destination,
    DestinationKind, MessageBroker, MessageEnvelope, Result, Settlement,
};
use dashmap::DashMap;
use futures::stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 主题订阅在代理内部对应的队列名
pub fn subscription_path(topic: &str, subscription: &str) -> String {
    format!("{topic}/subscriptions/{subscription}")
}

/// 已转入死信的消息
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: MessageEnvelope,
    pub reason: String,
    pub attempt: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// 单个队列的结算统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub acked: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub dead_lettered: u64,
}

struct Pending {
    envelope: MessageEnvelope,
    attempt: u32,
}

struct QueueChannels {
    sender: mpsc::Sender<Pending>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Pending>>>,
    depth: AtomicUsize,
    acked: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
    dead_lettered: AtomicU64,
}

impl QueueChannels {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            depth: AtomicUsize::new(0),
            acked: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    async fn push(&self, queue_name: &str, pending: Pending) -> Result<()> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.sender.send(pending).await {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(CourierError::Broker(format!(
                "Failed to send message to queue '{queue_name}': {e}"
            )));
        }
        Ok(())
    }

    /// 结算时重新入队，不等待通道空位
    ///
    /// 结算方往往就是该队列唯一的消费者，阻塞在满通道上会让消费循环自锁；
    /// 通道已满时改由后台任务等待空位。
    fn requeue(self: &Arc<Self>, queue_name: &str, pending: Pending) -> Result<()> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        match self.sender.try_send(pending) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(pending)) => {
                debug!("Queue '{}' is full, requeue deferred", queue_name);
                let queue = self.clone();
                let queue_name = queue_name.to_string();
                tokio::spawn(async move {
                    if let Err(e) = queue.sender.send(pending).await {
                        queue.depth.fetch_sub(1, Ordering::Relaxed);
                        warn!("Requeue to '{}' failed: {}", queue_name, e);
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                Err(CourierError::Broker(format!(
                    "Failed to requeue message to '{queue_name}': channel closed"
                )))
            }
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.depth.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

fn lock_letters(letters: &Mutex<VecDeque<DeadLetter>>) -> MutexGuard<'_, VecDeque<DeadLetter>> {
    letters
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BrokerState {
    config: BrokerConfig,
    queues: DashMap<String, Arc<QueueChannels>>,
    subscriptions: DashMap<String, HashSet<String>>,
    dead_letters: DashMap<String, Mutex<VecDeque<DeadLetter>>>,
}

impl BrokerState {
    fn get_or_create_queue(&self, queue_name: &str) -> Arc<QueueChannels> {
        if let Some(queue) = self.queues.get(queue_name) {
            return queue.clone();
        }

        self.queues
            .entry(queue_name.to_string())
            .or_insert_with(|| {
                debug!("Creating in-memory queue '{}'", queue_name);
                Arc::new(QueueChannels::new(self.config.channel_capacity))
            })
            .clone()
    }

    fn push_dead_letter(&self, queue_name: &str, dead_letter: DeadLetter) {
        let entry = self
            .dead_letters
            .entry(queue_name.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));

        let mut letters = lock_letters(&entry);
        // 超出容量时丢弃最早的死信
        while !letters.is_empty() && letters.len() >= self.config.dead_letter_capacity {
            letters.pop_front();
        }
        letters.push_back(dead_letter);
    }
}

/// 进程内消息代理
///
/// 每个队列对应一个有界 mpsc 通道，多个消费者共享同一接收端并竞争消费；
/// 主题按订阅名扇出到各自的内部队列。重试在延迟后以投递次数加一重新入队，
/// 死信按队列保留，超过 `dead_letter_capacity` 时淘汰最早的记录。
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        info!(
            "Creating in-memory broker (channel_capacity: {}, dead_letter_capacity: {})",
            config.channel_capacity, config.dead_letter_capacity
        );
        Self {
            state: Arc::new(BrokerState {
                config,
                queues: DashMap::new(),
                subscriptions: DashMap::new(),
                dead_letters: DashMap::new(),
            }),
        }
    }

    /// 某个队列（或 `subscription_path` 得到的主题订阅）中保留的死信
    pub fn dead_letters(&self, queue_name: &str) -> Vec<DeadLetter> {
        self.state
            .dead_letters
            .get(queue_name)
            .map(|entry| {
                let letters = lock_letters(&entry);
                letters.iter().cloned().collect()
            })
            .unwrap_or_default()
    }

    /// 各队列的死信数量，按队列名排序
    pub fn dead_letter_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .state
            .dead_letters
            .iter()
            .map(|entry| {
                let len = lock_letters(entry.value()).len();
                (entry.key().clone(), len)
            })
            .collect();
        counts.sort();
        counts
    }

    pub fn queue_stats(&self, queue_name: &str) -> Option<QueueStats> {
        self.state.queues.get(queue_name).map(|queue| queue.stats())
    }

    pub fn queue_depth(&self, queue_name: &str) -> usize {
        self.queue_stats(queue_name)
            .map(|stats| stats.depth)
            .unwrap_or(0)
    }

    /// 主题当前的订阅名
    pub fn subscriptions(&self, topic: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .subscriptions
            .get(topic)
            .map(|subs| subs.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn queue_name_for(destination: &Destination, subscription: &str) -> String {
        match destination.kind {
            DestinationKind::Queue => destination.name.clone(),
            DestinationKind::Topic => subscription_path(&destination.name, subscription),
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, destination: &Destination, envelope: MessageEnvelope) -> Result<()> {
        debug!("Sending message {} to {}", envelope.id, destination);

        let targets: Vec<String> = match destination.kind {
            DestinationKind::Queue => vec![destination.name.clone()],
            DestinationKind::Topic => self
                .state
                .subscriptions
                .get(&destination.name)
                .map(|subs| {
                    subs.iter()
                        .map(|sub| subscription_path(&destination.name, sub))
                        .collect()
                })
                .unwrap_or_default(),
        };

        if targets.is_empty() {
            debug!(
                "Topic '{}' has no subscriptions, message {} discarded",
                destination.name, envelope.id
            );
            return Ok(());
        }

        for queue_name in targets {
            let queue = self.state.get_or_create_queue(&queue_name);
            queue
                .push(
                    &queue_name,
                    Pending {
                        envelope: envelope.clone(),
                        attempt: 1,
                    },
                )
                .await?;
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        subscription: &str,
    ) -> Result<DeliveryStream> {
        if destination.kind == DestinationKind::Topic {
            if subscription.trim().is_empty() {
                return Err(CourierError::Broker(format!(
                    "Subscription name required for topic '{}'",
                    destination.name
                )));
            }
            self.state
                .subscriptions
                .entry(destination.name.clone())
                .or_default()
                .insert(subscription.to_string());
        }

        let queue_name = Self::queue_name_for(destination, subscription);
        let queue = self.state.get_or_create_queue(&queue_name);
        info!("Subscribed to {} (queue '{}')", destination, queue_name);

        let state = self.state.clone();
        let deliveries = stream::unfold(
            (state, queue, queue_name),
            |(state, queue, queue_name)| async move {
                let pending = {
                    let mut receiver = queue.receiver.lock().await;
                    receiver.recv().await
                }?;
                queue.depth.fetch_sub(1, Ordering::Relaxed);

                let settler = InMemorySettler {
                    state: state.clone(),
                    queue: queue.clone(),
                    queue_name: queue_name.clone(),
                    envelope: pending.envelope.clone(),
                    attempt: pending.attempt,
                };
                let delivery = Delivery::new(pending.envelope, pending.attempt, Box::new(settler));
                Some((delivery, (state, queue, queue_name)))
            },
        );

        Ok(Box::pin(deliveries))
    }
}

struct InMemorySettler {
    state: Arc<BrokerState>,
    queue: Arc<QueueChannels>,
    queue_name: String,
    envelope: MessageEnvelope,
    attempt: u32,
}

#[async_trait]
impl DeliverySettler for InMemorySettler {
    async fn settle(self: Box<Self>, settlement: Settlement) -> Result<()> {
        let InMemorySettler {
            state,
            queue,
            queue_name,
            envelope,
            attempt,
        } = *self;

        match settlement {
            Settlement::Ack => {
                queue.acked.fetch_add(1, Ordering::Relaxed);
                debug!("Acked message {} on '{}'", envelope.id, queue_name);
            }
            Settlement::Retry { delay } => {
                queue.retried.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Redelivering message {} on '{}' in {:?} (attempt {})",
                    envelope.id,
                    queue_name,
                    delay,
                    attempt + 1
                );
                let pending = Pending {
                    envelope,
                    attempt: attempt + 1,
                };
                if delay.is_zero() {
                    queue.requeue(&queue_name, pending)?;
                } else {
                    tokio::spawn(redeliver_later(queue, queue_name, pending, delay));
                }
            }
            Settlement::Abandon => {
                queue.abandoned.fetch_add(1, Ordering::Relaxed);
                debug!("Abandoned message {} on '{}'", envelope.id, queue_name);
                queue.requeue(&queue_name, Pending { envelope, attempt })?;
            }
            Settlement::DeadLetter { reason } => {
                queue.dead_lettered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Message {} on '{}' dead-lettered after {} attempt(s): {}",
                    envelope.id, queue_name, attempt, reason
                );
                state.push_dead_letter(
                    &queue_name,
                    DeadLetter {
                        envelope,
                        reason,
                        attempt,
                        dead_lettered_at: Utc::now(),
                    },
                );
            }
        }

        Ok(())
    }
}

async fn redeliver_later(
    queue: Arc<QueueChannels>,
    queue_name: String,
    pending: Pending,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    if let Err(e) = queue.push(&queue_name, pending).await {
        warn!("Redelivery failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn broker() -> InMemoryBroker {
        InMemoryBroker::new(BrokerConfig {
            channel_capacity: 16,
            dead_letter_capacity: 2,
        })
    }

    fn envelope(id: &str) -> MessageEnvelope {
        MessageEnvelope::new(id, "price-update", b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_queue_send_and_ack() {
        let broker = broker();
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        broker.send(&queue, envelope("730/1")).await.unwrap();
        assert_eq!(broker.queue_depth("price-update"), 1);

        let delivery = deliveries.next().await.unwrap();
        assert_eq!(delivery.envelope.id, "730/1");
        assert_eq!(delivery.attempt, 1);
        delivery.settle(Settlement::Ack).await.unwrap();

        let stats = broker.queue_stats("price-update").unwrap();
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.acked, 1);
    }

    #[tokio::test]
    async fn test_retry_increments_attempt() {
        let broker = broker();
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        broker.send(&queue, envelope("730/1")).await.unwrap();
        let first = deliveries.next().await.unwrap();
        first
            .settle(Settlement::Retry {
                delay: Duration::ZERO,
            })
            .await
            .unwrap();

        let second = deliveries.next().await.unwrap();
        assert_eq!(second.envelope.id, "730/1");
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_retry_waits_for_delay() {
        let broker = broker();
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        broker.send(&queue, envelope("730/1")).await.unwrap();
        let first = deliveries.next().await.unwrap();
        first
            .settle(Settlement::Retry {
                delay: Duration::from_secs(5),
            })
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let second = deliveries.next().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test]
    async fn test_abandon_keeps_attempt() {
        let broker = broker();
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        broker.send(&queue, envelope("730/1")).await.unwrap();
        deliveries
            .next()
            .await
            .unwrap()
            .settle(Settlement::Abandon)
            .await
            .unwrap();

        let again = deliveries.next().await.unwrap();
        assert_eq!(again.attempt, 1);
        assert_eq!(broker.queue_stats("price-update").unwrap().abandoned, 1);
    }

    #[tokio::test]
    async fn test_settle_on_full_queue_does_not_block() {
        let broker = InMemoryBroker::new(BrokerConfig {
            channel_capacity: 1,
            dead_letter_capacity: 2,
        });
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        broker.send(&queue, envelope("a")).await.unwrap();
        let first = deliveries.next().await.unwrap();
        broker.send(&queue, envelope("b")).await.unwrap();
        let second = deliveries.next().await.unwrap();
        broker.send(&queue, envelope("c")).await.unwrap();

        let settled = tokio::time::timeout(Duration::from_secs(1), async {
            first.settle(Settlement::Abandon).await.unwrap();
            second
                .settle(Settlement::Retry {
                    delay: Duration::ZERO,
                })
                .await
                .unwrap();
        })
        .await;
        assert!(settled.is_ok());

        let mut redelivered = Vec::new();
        for _ in 0..3 {
            let delivery = deliveries.next().await.unwrap();
            redelivered.push((delivery.envelope.id.clone(), delivery.attempt));
        }
        redelivered.sort();
        assert_eq!(
            redelivered,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
        assert_eq!(broker.queue_depth("price-update"), 0);
    }

    #[tokio::test]
    async fn test_dead_letters_retained_with_capacity() {
        let broker = broker();
        let queue = Destination::queue("price-update");
        let mut deliveries = broker.subscribe(&queue, "").await.unwrap();

        for id in ["a", "b", "c"] {
            broker.send(&queue, envelope(id)).await.unwrap();
            deliveries
                .next()
                .await
                .unwrap()
                .settle(Settlement::DeadLetter {
                    reason: format!("bad {id}"),
                })
                .await
                .unwrap();
        }

        let letters = broker.dead_letters("price-update");
        assert_eq!(letters.len(), 2);
        assert_eq!(letters[0].envelope.id, "b");
        assert_eq!(letters[1].reason, "bad c");
        assert_eq!(
            broker.dead_letter_counts(),
            vec![("price-update".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn test_topic_fans_out_to_each_subscription() {
        let broker = broker();
        let topic = Destination::topic("store-events");
        let mut first = broker.subscribe(&topic, "inventory").await.unwrap();
        let mut second = broker.subscribe(&topic, "search").await.unwrap();

        broker.send(&topic, envelope("item-1")).await.unwrap();

        assert_eq!(first.next().await.unwrap().envelope.id, "item-1");
        assert_eq!(second.next().await.unwrap().envelope.id, "item-1");
        assert_eq!(broker.subscriptions("store-events"), vec!["inventory", "search"]);
    }

    #[tokio::test]
    async fn test_topic_without_subscriptions_discards() {
        let broker = broker();
        let topic = Destination::topic("store-events");

        broker.send(&topic, envelope("item-1")).await.unwrap();
        assert!(broker.subscriptions("store-events").is_empty());
        assert_eq!(
            broker.queue_depth(&subscription_path("store-events", "late")),
            0
        );
    }

    #[tokio::test]
    async fn test_topic_requires_subscription_name() {
        let broker = broker();
        assert!(broker
            .subscribe(&Destination::topic("store-events"), " ")
            .await
            .is_err());
    }
}
