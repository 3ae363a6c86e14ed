use std::time::Duration;

use courier_core::{DispatcherConfig, HandlerError};

/// 处理失败后的结算决定
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    DeadLetter { reason: String },
}

/// 重试策略：投递次数阈值与指数退避
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatcherConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            backoff_multiplier: config.retry_backoff_multiplier,
            jitter_factor: config.retry_jitter_factor,
        }
    }

    /// 第 `attempt` 次投递失败后的决定；终态错误与用尽次数都转入死信
    pub fn decide(&self, attempt: u32, error: &HandlerError) -> RetryDecision {
        if error.is_terminal() {
            return RetryDecision::DeadLetter {
                reason: error.to_string(),
            };
        }

        if attempt >= self.max_attempts {
            return RetryDecision::DeadLetter {
                reason: format!("已达到最大投递次数 {}: {}", self.max_attempts, error),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }

    /// 第 `attempt` 次失败后的重投延迟
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(base);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;

        let exponential = base * self.backoff_multiplier.powi(exponent);
        let capped = exponential.min(max);

        // 随机抖动，避免同一批失败消息同时重投
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(base, max);

        if delay.is_finite() {
            Duration::from_secs_f64(delay)
        } else {
            self.max_delay
        }
    }
}
