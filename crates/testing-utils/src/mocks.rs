//! 测试替身
//!
//! [`RecordingHandler`] 记录每次调用并统计峰值并发；[`ScriptedJob`] 按设定时长运行，
//! 同样统计运行次数与峰值并发。两者都可以 clone 后在测试中读取计数。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{
    HandlerError, HandlerResult, Job, JobContext, Message, MessageContext, MessageHandler,
};
use tokio::time::Instant;

/// 处理器的失败方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerBehavior {
    Succeed,
    /// 每次都返回可重试错误
    FailAlways,
    /// 前 N 次投递失败，之后成功
    FailFirst(u32),
    /// 主动转入死信
    DeadLetter,
    Panic,
}

/// 一次处理器调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message_id: String,
    pub attempt: u32,
    pub started_at: Instant,
}

#[derive(Debug, Default)]
struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn enter(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct HandlerState {
    tracker: ConcurrencyTracker,
    completed: AtomicUsize,
    calls: Mutex<Vec<RecordedCall>>,
}

#[derive(Debug, Clone)]
pub struct RecordingHandler {
    state: Arc<HandlerState>,
    delay: Duration,
    behavior: HandlerBehavior,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(HandlerState::default()),
            delay: Duration::ZERO,
            behavior: HandlerBehavior::Succeed,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_behavior(mut self, behavior: HandlerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn invocations(&self) -> usize {
        self.calls().len()
    }

    /// 处理器正常返回（不论成功或失败）的次数
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.state.tracker.active.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.tracker.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.message_id).collect()
    }

    fn outcome(&self, context: &MessageContext) -> HandlerResult {
        match self.behavior {
            HandlerBehavior::Succeed => Ok(()),
            HandlerBehavior::FailAlways => Err(HandlerError::Failed(format!(
                "第 {} 次处理失败",
                context.attempt
            ))),
            HandlerBehavior::FailFirst(n) if context.attempt <= n => Err(HandlerError::Failed(
                format!("第 {} 次处理失败", context.attempt),
            )),
            HandlerBehavior::FailFirst(_) => Ok(()),
            HandlerBehavior::DeadLetter => Err(context.dead_letter("测试处理器拒绝该消息")),
            HandlerBehavior::Panic => panic!("测试处理器 panic"),
        }
    }
}

#[async_trait]
impl<M: Message> MessageHandler<M> for RecordingHandler {
    async fn handle(&self, _message: M, context: MessageContext) -> HandlerResult {
        if let Ok(mut calls) = self.state.calls.lock() {
            calls.push(RecordedCall {
                message_id: context.message_id.clone(),
                attempt: context.attempt,
                started_at: Instant::now(),
            });
        }

        self.state.tracker.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.state.tracker.exit();

        let result = self.outcome(&context);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// 作业的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobBehavior {
    Succeed,
    Fail,
    Panic,
}

#[derive(Debug, Default)]
struct JobState {
    tracker: ConcurrencyTracker,
    completed: AtomicU64,
    starts: Mutex<Vec<Instant>>,
}

#[derive(Debug, Clone)]
pub struct ScriptedJob {
    state: Arc<JobState>,
    duration: Duration,
    behavior: JobBehavior,
}

impl ScriptedJob {
    pub fn new(duration: Duration) -> Self {
        Self {
            state: Arc::new(JobState::default()),
            duration,
            behavior: JobBehavior::Succeed,
        }
    }

    pub fn with_behavior(mut self, behavior: JobBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn runs(&self) -> usize {
        self.start_times().len()
    }

    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.state.tracker.active.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.state.tracker.peak.load(Ordering::SeqCst)
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.state
            .starts
            .lock()
            .map(|starts| starts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Job for ScriptedJob {
    async fn run(&self, _context: JobContext) -> anyhow::Result<()> {
        if let Ok(mut starts) = self.state.starts.lock() {
            starts.push(Instant::now());
        }

        self.state.tracker.enter();
        tokio::time::sleep(self.duration).await;
        self.state.tracker.exit();
        self.state.completed.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            JobBehavior::Succeed => Ok(()),
            JobBehavior::Fail => Err(anyhow::anyhow!("作业执行失败")),
            JobBehavior::Panic => panic!("作业 panic"),
        }
    }
}
