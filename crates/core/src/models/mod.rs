//! # 数据模型
//!
//! 消息信封、路由元数据与作业描述。
//!
//! - [`MessageEnvelope`]：生产者交给消息代理的不可变信封，ID即自然键/去重键
//! - [`RouteDescriptor`]：按消息类型注册的目标、去重窗口与并发上限
//! - [`JobDescriptor`]：作业名称与触发规则

pub mod job;
pub mod message;
pub mod route;

pub use job::{normalize_cron_expression, parse_time_zone, JobDescriptor, TriggerSpec};
pub use message::{Message, MessageEnvelope};
pub use route::{Destination, DestinationKind, RouteDescriptor};
