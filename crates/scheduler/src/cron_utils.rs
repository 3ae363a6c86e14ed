use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use courier_core::{models::normalize_cron_expression, CourierError, Result};
use cron::Schedule;
use tracing::warn;

/// CRON表达式解析与求值工具，在固定参考时区内计算触发时间
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
    time_zone: Tz,
}

impl CronScheduler {
    /// 创建CRON调度器，五段表达式自动补齐秒字段
    pub fn new(cron_expr: &str, time_zone: Tz) -> Result<Self> {
        let expression = normalize_cron_expression(cron_expr)?;
        let schedule = Schedule::from_str(&expression).map_err(|e| CourierError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression,
            schedule,
            time_zone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = from.with_timezone(&self.time_zone);
        let next = self
            .schedule
            .after(&local)
            .map(|time| time.with_timezone(&Utc))
            .find(|time| *time > from);

        if next.is_none() {
            warn!(
                "无法计算下一次执行时间: {} ({}), 起点 {}",
                self.expression, self.time_zone, from
            );
        }
        next
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let local = from.with_timezone(&self.time_zone);
        self.schedule
            .after(&local)
            .map(|time| time.with_timezone(&Utc))
            .filter(|time| *time > from)
            .take(count)
            .collect()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_after(now)
            .and_then(|next| (next - now).to_std().ok())
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> Result<()> {
        normalize_cron_expression(cron_expr).map(|_| ())
    }
}
