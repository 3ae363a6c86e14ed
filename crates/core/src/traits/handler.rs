use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::{Destination, Message};

/// 处理器执行失败的原因
#[derive(Debug, Error)]
pub enum HandlerError {
    /// 可恢复失败，由分发器决定重试或在次数耗尽后转入死信
    #[error("处理失败: {0}")]
    Failed(String),

    /// 处理器主动要求转入死信，不再重试
    #[error("主动转入死信: {reason}")]
    DeadLetter { reason: String },

    /// 消息体无法解码，重试没有意义
    #[error("消息体解码失败: {0}")]
    Decode(String),
}

impl HandlerError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerError::DeadLetter { .. } | HandlerError::Decode(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        HandlerError::Failed(format!("{error:#}"))
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;

/// 处理器上下文
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: String,
    pub type_name: String,
    pub destination: Destination,
    pub enqueued_at: DateTime<Utc>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub properties: HashMap<String, String>,
    pub cancellation: CancellationToken,
}

impl MessageContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// 构造一个主动死信结果，供处理器直接返回
    pub fn dead_letter(&self, reason: impl Into<String>) -> HandlerError {
        HandlerError::DeadLetter {
            reason: reason.into(),
        }
    }
}

/// 强类型消息处理器
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync {
    async fn handle(&self, message: M, context: MessageContext) -> HandlerResult;
}
