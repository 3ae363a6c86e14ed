use serde::{Deserialize, Serialize};

/// 消息分发器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    /// 订阅主题时使用的订阅名
    pub subscription_name: String,
    /// 最大投递次数（含首次），耗尽后转入死信
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub retry_jitter_factor: f64,
    /// 关闭时等待处理中消息完成的宽限期
    pub shutdown_grace_seconds: u64,
    /// 去重记录后台清理间隔，0表示只做惰性清理
    pub dedup_sweep_interval_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subscription_name: "courier".to_string(),
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            retry_backoff_multiplier: 2.0,
            retry_jitter_factor: 0.1,
            shutdown_grace_seconds: 30,
            dedup_sweep_interval_seconds: 300,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.subscription_name.trim().is_empty() {
            return Err(anyhow::anyhow!("订阅名不能为空"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大投递次数必须大于0"));
        }

        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(anyhow::anyhow!(
                "最大重试间隔({}ms)不能小于基础重试间隔({}ms)",
                self.retry_max_delay_ms,
                self.retry_base_delay_ms
            ));
        }

        if self.retry_backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            return Err(anyhow::anyhow!(
                "抖动系数必须在0.0到1.0之间: {}",
                self.retry_jitter_factor
            ));
        }

        Ok(())
    }
}

/// 作业调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// 作业未指定时区时使用的参考时区
    pub default_time_zone: String,
    /// 关闭时等待运行中作业完成的宽限期
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_time_zone: "UTC".to_string(),
            shutdown_grace_seconds: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        crate::models::parse_time_zone(&self.default_time_zone)
            .map_err(|e| anyhow::anyhow!("默认时区无效: {e}"))?;
        Ok(())
    }
}
