use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_core::{CourierError, Result, TriggerSpec};

use crate::cron_utils::CronScheduler;

/// 已解析的触发器
#[derive(Debug, Clone)]
pub enum JobTrigger {
    Interval(Duration),
    Cron(CronScheduler),
}

impl JobTrigger {
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self> {
        match spec {
            TriggerSpec::Interval(interval) if interval.is_zero() => Err(
                CourierError::InvalidTrigger("触发间隔必须大于0".to_string()),
            ),
            TriggerSpec::Interval(interval) => Ok(JobTrigger::Interval(*interval)),
            TriggerSpec::Cron {
                expression,
                time_zone,
            } => Ok(JobTrigger::Cron(CronScheduler::new(expression, *time_zone)?)),
        }
    }

    /// 间隔触发为 上次触发 + 间隔；CRON触发为严格晚于 `last_fire` 的下一次匹配
    pub fn next_fire_after(&self, last_fire: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            JobTrigger::Interval(interval) => chrono::Duration::from_std(*interval)
                .ok()
                .and_then(|interval| last_fire.checked_add_signed(interval)),
            JobTrigger::Cron(cron) => cron.next_after(last_fire),
        }
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_fire_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}
