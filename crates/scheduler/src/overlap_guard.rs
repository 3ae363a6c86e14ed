use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// 按作业名划分的防重叠锁
///
/// 只用 `try_lock`：上一次执行未结束时本次触发直接跳过，不排队。
/// 守卫随执行体任务一起 drop，成功、失败或 panic 都会释放。
#[derive(Debug, Default)]
pub struct OverlapGuards {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// 持有期间同名作业不会再次启动
pub type JobRunGuard = OwnedMutexGuard<()>;

impl OverlapGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn try_acquire(&self, name: &str) -> Option<JobRunGuard> {
        self.lock_for(name).try_lock_owned().ok()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// 等待正在执行的作业结束
    pub async fn wait_idle(&self, name: &str) {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
    }
}
