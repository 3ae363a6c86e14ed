//! # 作业调度
//!
//! 按间隔或CRON表达式触发周期作业，同名作业同一时刻最多一个执行体在运行。

pub mod cron_utils;
pub mod job_registry;
pub mod overlap_guard;
pub mod scheduler;
pub mod trigger;

pub use cron_utils::CronScheduler;
pub use job_registry::{JobRegistry, RegisteredJob};
pub use overlap_guard::{JobRunGuard, OverlapGuards};
pub use scheduler::{JobStats, Scheduler, SchedulerHandle};
pub use trigger::JobTrigger;
