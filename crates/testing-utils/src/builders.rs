//! Test data builders
//!
//! 带合理默认值的构造器，测试里只需覆盖关心的字段。

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{
    DestinationKind, JobConfig, Message, MessageEnvelope, RouteConfig, RouteDescriptor,
};

/// Builder for route descriptors and their config form
pub struct RouteDescriptorBuilder {
    destination: String,
    kind: DestinationKind,
    duplicate_window: Duration,
    max_concurrency: usize,
}

impl RouteDescriptorBuilder {
    pub fn new(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            kind: DestinationKind::Queue,
            duplicate_window: Duration::ZERO,
            max_concurrency: 1,
        }
    }

    pub fn topic(mut self) -> Self {
        self.kind = DestinationKind::Topic;
        self
    }

    pub fn with_duplicate_window_secs(mut self, seconds: u64) -> Self {
        self.duplicate_window = Duration::from_secs(seconds);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn build(self) -> RouteDescriptor {
        RouteDescriptor {
            destination: self.destination,
            kind: self.kind,
            duplicate_window: self.duplicate_window,
            max_concurrency: self.max_concurrency,
        }
    }

    pub fn build_config(self, message_type: &str) -> RouteConfig {
        RouteConfig {
            message_type: message_type.to_string(),
            destination: self.destination,
            kind: self.kind,
            duplicate_window_seconds: self.duplicate_window.as_secs(),
            max_concurrency: self.max_concurrency,
        }
    }
}

/// Builder for message envelopes
pub struct EnvelopeBuilder {
    id: String,
    type_name: String,
    body: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    properties: HashMap<String, String>,
}

impl EnvelopeBuilder {
    pub fn new(type_name: &str) -> Self {
        Self {
            id: "test-message".to_string(),
            type_name: type_name.to_string(),
            body: b"{}".to_vec(),
            enqueued_at: Utc::now(),
            properties: HashMap::new(),
        }
    }

    /// 以强类型消息的自然键与JSON内容初始化
    pub fn for_message<M: Message>(message: &M) -> Self {
        Self::new(M::TYPE_NAME)
            .with_id(&message.key())
            .with_body(serde_json::to_vec(message).unwrap_or_default())
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_json(self, body: serde_json::Value) -> Self {
        self.with_body(body.to_string().into_bytes())
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn with_property(mut self, key: &str, value: &str) -> Self {
        self.properties.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::new(self.id, self.type_name, self.body)
            .with_enqueued_at(self.enqueued_at);
        envelope.properties = self.properties;
        envelope
    }
}

/// Builder for job configuration entries
pub struct JobConfigBuilder {
    config: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: JobConfig {
                name: name.to_string(),
                every_seconds: None,
                cron: None,
                time_zone: None,
                enabled: true,
            },
        }
    }

    pub fn every_seconds(mut self, seconds: u64) -> Self {
        self.config.every_seconds = Some(seconds);
        self
    }

    pub fn cron(mut self, expression: &str) -> Self {
        self.config.cron = Some(expression.to_string());
        self
    }

    pub fn with_time_zone(mut self, time_zone: &str) -> Self {
        self.config.time_zone = Some(time_zone.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.config.enabled = false;
        self
    }

    pub fn build(self) -> JobConfig {
        self.config
    }
}
