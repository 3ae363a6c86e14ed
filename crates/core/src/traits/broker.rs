use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    models::{Destination, MessageEnvelope},
    Result,
};

/// 单条投递的结算方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// 处理完成（包括被判定为重复的消息）
    Ack,
    /// 请求代理在延迟后重新投递，投递次数加一
    Retry { delay: Duration },
    /// 放弃本次投递，代理重新入队且不计入投递次数
    Abandon,
    /// 终态：移入死信，保留待查
    DeadLetter { reason: String },
}

impl Settlement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Settlement::Ack => "ack",
            Settlement::Retry { .. } => "retry",
            Settlement::Abandon => "abandon",
            Settlement::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// 代理提供的结算回调，每条投递只能结算一次
#[async_trait]
pub trait DeliverySettler: Send + Sync {
    async fn settle(self: Box<Self>, settlement: Settlement) -> Result<()>;
}

/// 代理交付给消费者的一条消息
pub struct Delivery {
    pub envelope: MessageEnvelope,
    /// 投递次数，从1开始
    pub attempt: u32,
    pub settler: Box<dyn DeliverySettler>,
}

impl Delivery {
    pub fn new(envelope: MessageEnvelope, attempt: u32, settler: Box<dyn DeliverySettler>) -> Self {
        Self {
            envelope,
            attempt,
            settler,
        }
    }

    pub async fn settle(self, settlement: Settlement) -> Result<()> {
        self.settler.settle(settlement).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("envelope", &self.envelope)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

pub type DeliveryStream = BoxStream<'static, Delivery>;

/// 消息代理抽象接口
///
/// 具体传输协议不在本系统范围内，只要求代理携带 `enqueued_at` 与消息ID，
/// 并支持逐条确认、重试和死信结算。
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// 发送信封到目标队列或主题
    async fn send(&self, destination: &Destination, envelope: MessageEnvelope) -> Result<()>;

    /// 订阅目标；主题按订阅名各自获得一份副本，队列忽略订阅名
    async fn subscribe(&self, destination: &Destination, subscription: &str)
        -> Result<DeliveryStream>;
}
