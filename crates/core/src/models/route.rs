use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 目标类型：点对点队列或广播主题
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    #[default]
    Queue,
    Topic,
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKind::Queue => write!(f, "queue"),
            DestinationKind::Topic => write!(f, "topic"),
        }
    }
}

/// 消息类型的路由元数据，启动时创建，之后只读共享
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    pub destination: String,
    pub kind: DestinationKind,
    /// 为零时关闭去重
    pub duplicate_window: Duration,
    pub max_concurrency: usize,
}

impl RouteDescriptor {
    pub fn queue(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            kind: DestinationKind::Queue,
            duplicate_window: Duration::ZERO,
            max_concurrency: 1,
        }
    }

    pub fn topic(destination: impl Into<String>) -> Self {
        Self {
            kind: DestinationKind::Topic,
            ..Self::queue(destination)
        }
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn is_topic(&self) -> bool {
        self.kind == DestinationKind::Topic
    }

    pub fn dedup_enabled(&self) -> bool {
        !self.duplicate_window.is_zero()
    }
}

/// 订阅地址：队列直接按名称订阅，主题需要附带订阅名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub name: String,
    pub kind: DestinationKind,
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Queue,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DestinationKind::Topic,
        }
    }
}

impl From<&RouteDescriptor> for Destination {
    fn from(route: &RouteDescriptor) -> Self {
        Self {
            name: route.destination.clone(),
            kind: route.kind,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}
