use serde::{Deserialize, Serialize};

/// 进程内消息代理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 每个队列（或主题订阅）的通道容量
    pub channel_capacity: usize,
    /// 每个目标保留的死信条数上限，超出后丢弃最早的记录
    pub dead_letter_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            dead_letter_capacity: 1_000,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.channel_capacity == 0 {
            return Err(anyhow::anyhow!("通道容量必须大于0"));
        }

        if self.dead_letter_capacity == 0 {
            return Err(anyhow::anyhow!("死信保留条数必须大于0"));
        }

        Ok(())
    }
}
