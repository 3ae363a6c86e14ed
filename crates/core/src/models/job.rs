use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use cron::Schedule;

use crate::errors::{CourierError, Result};

/// 作业触发规则
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerSpec {
    /// 固定间隔，下一次触发时间 = 上一次触发时间 + 间隔
    Interval(Duration),
    /// CRON表达式，在固定参考时区内求值
    Cron { expression: String, time_zone: Tz },
}

impl TriggerSpec {
    pub fn every(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(CourierError::InvalidTrigger("触发间隔必须大于0".to_string()));
        }
        Ok(TriggerSpec::Interval(interval))
    }

    pub fn every_seconds(seconds: u64) -> Result<Self> {
        Self::every(Duration::from_secs(seconds))
    }

    /// 解析五段或六段（可带年份的七段）CRON表达式
    pub fn cron(expression: &str, time_zone: Tz) -> Result<Self> {
        let expression = normalize_cron_expression(expression)?;
        Ok(TriggerSpec::Cron {
            expression,
            time_zone,
        })
    }

    /// 解析触发器文本：`every 30s` / `every 5 minutes` 形式为间隔，其余按CRON处理
    pub fn parse(spec: &str, time_zone: Tz) -> Result<Self> {
        let trimmed = spec.trim();
        match trimmed.strip_prefix("every ") {
            Some(rest) => Self::every(parse_duration(rest)?),
            None => Self::cron(trimmed, time_zone),
        }
    }

    pub fn schedule(&self) -> Option<Schedule> {
        match self {
            TriggerSpec::Interval(_) => None,
            TriggerSpec::Cron { expression, .. } => Schedule::from_str(expression).ok(),
        }
    }
}

impl fmt::Display for TriggerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSpec::Interval(interval) => write!(f, "every {}s", interval.as_secs()),
            TriggerSpec::Cron {
                expression,
                time_zone,
            } => write!(f, "cron '{expression}' ({time_zone})"),
        }
    }
}

/// 作业描述：名称唯一，同名作业在任意时刻最多只有一个执行体在运行
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub name: String,
    pub trigger: TriggerSpec,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, trigger: TriggerSpec) -> Self {
        Self {
            name: name.into(),
            trigger,
        }
    }
}

/// cron 库要求秒字段，五段表达式补齐秒位 `0`
pub fn normalize_cron_expression(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!("0 {}", fields.join(" ")),
        6 | 7 => fields.join(" "),
        n => {
            return Err(CourierError::InvalidCron {
                expr: expression.to_string(),
                message: format!("字段数量应为5、6或7，实际为{n}"),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| CourierError::InvalidCron {
        expr: expression.to_string(),
        message: e.to_string(),
    })?;

    Ok(normalized)
}

pub fn parse_time_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CourierError::InvalidTimeZone(name.to_string()))
}

fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split_at = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split_at);
    let value: u64 = number
        .parse()
        .map_err(|_| CourierError::InvalidTrigger(format!("无法解析的间隔: {text}")))?;

    let seconds = match unit.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => value,
        "m" | "min" | "mins" | "minute" | "minutes" => value * 60,
        "h" | "hour" | "hours" => value * 3600,
        other => {
            return Err(CourierError::InvalidTrigger(format!(
                "不支持的时间单位: {other}"
            )))
        }
    };

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_five_field_cron() {
        assert_eq!(normalize_cron_expression("45 * * * *").unwrap(), "0 45 * * * *");
        assert_eq!(
            normalize_cron_expression("0 45 * * * *").unwrap(),
            "0 45 * * * *"
        );
        assert!(normalize_cron_expression("* *").is_err());
        assert!(normalize_cron_expression("0 0 0 32 * *").is_err());
    }

    #[test]
    fn test_parse_interval_trigger() {
        let utc = chrono_tz::UTC;
        assert_eq!(
            TriggerSpec::parse("every 5s", utc).unwrap(),
            TriggerSpec::Interval(Duration::from_secs(5))
        );
        assert_eq!(
            TriggerSpec::parse("every 2 minutes", utc).unwrap(),
            TriggerSpec::Interval(Duration::from_secs(120))
        );
        assert_eq!(
            TriggerSpec::parse("every 1h", utc).unwrap(),
            TriggerSpec::Interval(Duration::from_secs(3600))
        );
        assert!(TriggerSpec::parse("every 0s", utc).is_err());
        assert!(TriggerSpec::parse("every 5 fortnights", utc).is_err());
    }

    #[test]
    fn test_parse_cron_trigger_with_zone() {
        let tz = parse_time_zone("Europe/London").unwrap();
        let trigger = TriggerSpec::parse("0 45 * * * *", tz).unwrap();

        match &trigger {
            TriggerSpec::Cron {
                expression,
                time_zone,
            } => {
                assert_eq!(expression, "0 45 * * * *");
                assert_eq!(*time_zone, chrono_tz::Europe::London);
            }
            other => panic!("expected cron trigger, got {other:?}"),
        }
        assert!(trigger.schedule().is_some());
        assert!(trigger.to_string().contains("Europe/London"));
    }

    #[test]
    fn test_invalid_time_zone() {
        assert!(matches!(
            parse_time_zone("Mars/Olympus"),
            Err(CourierError::InvalidTimeZone(_))
        ));
    }
}
