use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use courier_core::{
    job_fn, AppConfig, CourierError, HandlerResult, Job, JobContext, JobDescriptor, Message,
    MessageContext, MessageHandler, RouteRegistry, TriggerSpec,
};
use courier_dispatcher::{
    DedupStore, DispatcherHandle, DispatcherStats, HandlerRegistry, MessageDispatcher,
    MessagePublisher,
};
use courier_infrastructure::InMemoryBroker;
use courier_scheduler::{JobRegistry, JobStats, Scheduler, SchedulerHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builtin::{DeadLetterReportJob, DedupSweepJob, DEAD_LETTER_REPORT_JOB, DEDUP_SWEEP_JOB};

/// 主应用程序
///
/// 组合根：持有配置、消息代理、路由表、处理器与作业执行体。
/// 所有注册在 [`Application::start`] 之前完成，启动时统一校验，任何配置错误都在
/// 拉取第一条消息或第一次触发之前暴露。
pub struct Application {
    config: AppConfig,
    broker: InMemoryBroker,
    routes: Arc<RouteRegistry>,
    handlers: HandlerRegistry,
    job_bodies: HashMap<String, Arc<dyn Job>>,
    dedup: Arc<DedupStore>,
}

impl Application {
    /// 创建新的应用实例
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        let routes = Arc::new(config.route_registry()?);
        let broker = InMemoryBroker::new(config.broker.clone());
        let dedup = Arc::new(DedupStore::new());

        let mut job_bodies: HashMap<String, Arc<dyn Job>> = HashMap::new();
        job_bodies.insert(
            DEDUP_SWEEP_JOB.to_string(),
            Arc::new(DedupSweepJob::new(dedup.clone())),
        );
        job_bodies.insert(
            DEAD_LETTER_REPORT_JOB.to_string(),
            Arc::new(DeadLetterReportJob::new(broker.clone())),
        );

        info!(
            "初始化应用程序: {} 个消息类型路由, {} 个作业配置",
            routes.len(),
            config.jobs.len()
        );

        Ok(Self {
            config,
            broker,
            routes,
            handlers: HandlerRegistry::new(),
            job_bodies,
            dedup,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn broker(&self) -> InMemoryBroker {
        self.broker.clone()
    }

    pub fn routes(&self) -> Arc<RouteRegistry> {
        self.routes.clone()
    }

    pub fn dedup_store(&self) -> Arc<DedupStore> {
        self.dedup.clone()
    }

    pub fn publisher(&self) -> MessagePublisher {
        MessagePublisher::new(Arc::new(self.broker.clone()), self.routes.clone())
    }

    /// 注册消息处理器，每个消息类型只能注册一个
    pub fn register_handler<M, H>(&mut self, handler: H) -> Result<&mut Self>
    where
        M: Message,
        H: MessageHandler<M> + 'static,
    {
        self.handlers.register::<M, H>(handler)?;
        Ok(self)
    }

    pub fn register_handler_fn<M, F, Fut>(&mut self, f: F) -> Result<&mut Self>
    where
        M: Message,
        F: Fn(M, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.register_fn::<M, F, Fut>(f)?;
        Ok(self)
    }

    /// 为配置中的作业绑定执行体，名称须与 `[[jobs]]` 中的 `name` 一致
    pub fn register_job<J>(&mut self, name: &str, job: J) -> Result<&mut Self>
    where
        J: Job + 'static,
    {
        if self.job_bodies.contains_key(name) {
            return Err(CourierError::DuplicateJob {
                name: name.to_string(),
            }
            .into());
        }
        self.job_bodies.insert(name.to_string(), Arc::new(job));
        Ok(self)
    }

    pub fn register_job_fn<F, Fut>(&mut self, name: &str, f: F) -> Result<&mut Self>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register_job(name, job_fn(f))
    }

    /// 启动前校验：处理器都有路由，启用的作业都有执行体
    pub fn validate(&self) -> Result<()> {
        self.handlers.validate(&self.routes)?;
        self.build_job_registry()?;
        Ok(())
    }

    fn build_job_registry(&self) -> Result<JobRegistry> {
        let mut registry = JobRegistry::new();
        registry.bind(self.config.job_descriptors()?, &self.job_bodies)?;

        let sweep_interval = self.config.dispatcher.dedup_sweep_interval_seconds;
        if self.config.dispatcher.enabled
            && sweep_interval > 0
            && !registry.contains(DEDUP_SWEEP_JOB)
            && !self.config.jobs.iter().any(|job| job.name == DEDUP_SWEEP_JOB)
        {
            if let Some(body) = self.job_bodies.get(DEDUP_SWEEP_JOB) {
                registry.register(
                    JobDescriptor::new(DEDUP_SWEEP_JOB, TriggerSpec::every_seconds(sweep_interval)?),
                    body.clone(),
                )?;
            }
        }

        for name in self.job_bodies.keys() {
            let builtin = name == DEDUP_SWEEP_JOB || name == DEAD_LETTER_REPORT_JOB;
            if !builtin && !registry.contains(name) {
                warn!("作业 {} 已注册执行体但未在配置中启用，不会被调度", name);
            }
        }

        Ok(registry)
    }

    /// 校验并启动分发器与调度器
    pub async fn start(self, shutdown: &CancellationToken) -> Result<ApplicationHandle> {
        // 先完成全部校验再启动任何组件
        let scheduler = if self.config.scheduler.enabled {
            Some(Scheduler::new(
                self.build_job_registry()?,
                &self.config.scheduler,
            ))
        } else {
            info!("Scheduler已禁用");
            None
        };

        let publisher = self.publisher();
        let Application {
            config,
            broker,
            routes,
            handlers,
            dedup,
            ..
        } = self;

        let dispatcher = if config.dispatcher.enabled {
            Some(
                MessageDispatcher::new(
                    Arc::new(broker.clone()),
                    routes,
                    handlers,
                    &config.dispatcher,
                )?
                .with_dedup_store(dedup),
            )
        } else {
            if !handlers.is_empty() {
                warn!("Dispatcher已禁用，{} 个处理器不会收到消息", handlers.len());
            }
            None
        };

        let dispatcher = match dispatcher {
            Some(dispatcher) => Some(dispatcher.start(shutdown).await?),
            None => None,
        };
        let scheduler = scheduler.map(|scheduler| scheduler.start(shutdown));

        info!("应用程序已启动");

        Ok(ApplicationHandle {
            dispatcher,
            scheduler,
            broker,
            publisher,
        })
    }

    /// 运行直到 `shutdown` 被取消，然后等待各组件排空
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let handle = self.start(&shutdown).await?;
        shutdown.cancelled().await;

        info!("收到关闭信号，等待组件停止");
        handle.wait().await;
        Ok(())
    }
}

/// 运行中的应用句柄
pub struct ApplicationHandle {
    dispatcher: Option<DispatcherHandle>,
    scheduler: Option<SchedulerHandle>,
    broker: InMemoryBroker,
    publisher: MessagePublisher,
}

impl ApplicationHandle {
    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn publisher(&self) -> &MessagePublisher {
        &self.publisher
    }

    pub fn dispatcher_stats(&self) -> HashMap<String, DispatcherStats> {
        self.dispatcher
            .as_ref()
            .map(|dispatcher| dispatcher.stats())
            .unwrap_or_default()
    }

    pub fn job_stats(&self) -> HashMap<String, JobStats> {
        self.scheduler
            .as_ref()
            .map(|scheduler| scheduler.stats())
            .unwrap_or_default()
    }

    pub fn shutdown(&self) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown();
        }
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown();
        }
    }

    /// 等待分发器与调度器退出，两者并行排空
    pub async fn wait(self) {
        let dispatcher = async {
            if let Some(dispatcher) = self.dispatcher {
                dispatcher.wait().await;
            }
        };
        let scheduler = async {
            if let Some(scheduler) = self.scheduler {
                scheduler.wait().await;
            }
        };
        tokio::join!(dispatcher, scheduler);
        info!("应用程序已停止");
    }

    pub async fn shutdown_and_wait(self) {
        self.shutdown();
        self.wait().await;
    }
}
