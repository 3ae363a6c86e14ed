use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// 可投递的强类型消息
///
/// `TYPE_NAME` 是路由表中的类型标识，`key` 返回消息的自然键，
/// 同时作为信封ID和去重键使用。
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;

    fn key(&self) -> String;
}

/// 消息信封
///
/// 由生产者创建，交给消息代理后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub type_name: String,
    pub body: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl MessageEnvelope {
    pub fn new(id: impl Into<String>, type_name: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            body,
            enqueued_at: Utc::now(),
            properties: HashMap::new(),
        }
    }

    /// 将强类型消息序列化为信封，空自然键时退化为随机ID
    pub fn from_message<M: Message>(message: &M) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(message)?;
        let key = message.key();
        let id = if key.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            key
        };
        Ok(Self::new(id, M::TYPE_NAME, body))
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn decode<M: Message>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn is_type<M: Message>(&self) -> bool {
        self.type_name == M::TYPE_NAME
    }

    pub fn serialize_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
