//! 消息消费侧：去重、并发控制、处理器分发与结算

pub mod concurrency_limiter;
pub mod dedup_store;
pub mod dispatcher;
pub mod handler_registry;
pub mod publisher;
pub mod retry_policy;

pub use concurrency_limiter::{ConcurrencyLimiter, ConcurrencySlot};
pub use dedup_store::DedupStore;
pub use dispatcher::{DispatcherHandle, DispatcherStats, MessageDispatcher};
pub use handler_registry::{DynHandler, HandlerRegistry};
pub use publisher::MessagePublisher;
pub use retry_policy::{RetryDecision, RetryPolicy};
