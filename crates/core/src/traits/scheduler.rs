use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// 作业执行上下文
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    /// 本作业第几次实际执行，从1开始
    pub run_number: u64,
    pub fired_at: DateTime<Utc>,
    /// 关闭时触发；作业可以选择提前结束，也可以忽略并运行到完成
    pub cancellation: CancellationToken,
}

/// 调度作业执行体
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, context: JobContext) -> anyhow::Result<()>;
}

/// 把异步闭包包装为作业
pub struct FnJob<F> {
    f: F,
}

pub fn job_fn<F, Fut>(f: F) -> FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnJob { f }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn run(&self, context: JobContext) -> anyhow::Result<()> {
        (self.f)(context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_job_fn_receives_context() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        let job = job_fn(move |ctx: JobContext| {
            let seen = seen_clone.clone();
            async move {
                seen.store(ctx.run_number, Ordering::SeqCst);
                Ok(())
            }
        });

        let ctx = JobContext {
            job_name: "cleanup".to_string(),
            run_number: 7,
            fired_at: Utc::now(),
            cancellation: CancellationToken::new(),
        };
        job.run(ctx).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
