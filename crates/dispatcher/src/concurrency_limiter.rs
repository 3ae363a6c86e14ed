use std::sync::Arc;

use courier_core::{CourierError, Result};
use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct DestinationLimit {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

/// 按目标划分的并发槽位
///
/// 每个目标一个计数信号量，首次使用时创建并在进程生命周期内缓存。
/// 信号量的上限以首次创建时为准，路由表已保证同一目标的上限一致。
#[derive(Debug, Default)]
pub struct ConcurrencyLimiter {
    limits: DashMap<String, DestinationLimit>,
}

/// 已获取的并发槽位，drop 时归还
#[derive(Debug)]
pub struct ConcurrencySlot {
    destination: String,
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencySlot {
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, destination: &str, max_concurrency: usize) -> Arc<Semaphore> {
        self.limits
            .entry(destination.to_string())
            .or_insert_with(|| {
                let max_concurrency = max_concurrency.max(1);
                debug!(
                    "Creating concurrency limit for '{}' (max: {})",
                    destination, max_concurrency
                );
                DestinationLimit {
                    semaphore: Arc::new(Semaphore::new(max_concurrency)),
                    max_concurrency,
                }
            })
            .semaphore
            .clone()
    }

    /// 等待空闲槽位；取消令牌触发时返回 `CourierError::Cancelled`
    pub async fn acquire(
        &self,
        destination: &str,
        max_concurrency: usize,
        cancellation: &CancellationToken,
    ) -> Result<ConcurrencySlot> {
        let semaphore = self.semaphore(destination, max_concurrency);

        let permit = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(CourierError::Cancelled),
            permit = semaphore.acquire_owned() => permit.map_err(|e| {
                CourierError::Internal(format!("并发信号量已关闭: {e}"))
            })?,
        };

        Ok(ConcurrencySlot {
            destination: destination.to_string(),
            _permit: permit,
        })
    }

    pub fn try_acquire(&self, destination: &str, max_concurrency: usize) -> Option<ConcurrencySlot> {
        self.semaphore(destination, max_concurrency)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConcurrencySlot {
                destination: destination.to_string(),
                _permit: permit,
            })
    }

    pub fn release(&self, slot: ConcurrencySlot) {
        drop(slot);
    }

    /// 目标当前占用的槽位数
    pub fn in_flight(&self, destination: &str) -> usize {
        self.limits
            .get(destination)
            .map(|limit| {
                limit
                    .max_concurrency
                    .saturating_sub(limit.semaphore.available_permits())
            })
            .unwrap_or(0)
    }

    pub fn max_concurrency(&self, destination: &str) -> Option<usize> {
        self.limits.get(destination).map(|limit| limit.max_concurrency)
    }
}
