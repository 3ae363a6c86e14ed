use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{
    parse_time_zone, DestinationKind, JobDescriptor, RouteDescriptor, TriggerSpec,
};
use crate::{CourierError, Result};

fn default_max_concurrency() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

/// 单个消息类型的路由配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    pub message_type: String,
    pub destination: String,
    #[serde(default)]
    pub kind: DestinationKind,
    /// 去重窗口（秒），默认0即不去重
    #[serde(default)]
    pub duplicate_window_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl RouteConfig {
    pub fn to_descriptor(&self) -> Result<RouteDescriptor> {
        if self.max_concurrency == 0 {
            return Err(CourierError::InvalidRoute(format!(
                "消息类型 {} 的最大并发数必须大于0",
                self.message_type
            )));
        }

        Ok(RouteDescriptor {
            destination: self.destination.clone(),
            kind: self.kind,
            duplicate_window: Duration::from_secs(self.duplicate_window_seconds),
            max_concurrency: self.max_concurrency,
        })
    }
}

/// 单个作业的调度配置，`every_seconds` 与 `cron` 二选一
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub every_seconds: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl JobConfig {
    pub fn to_descriptor(&self, default_time_zone: &str) -> Result<JobDescriptor> {
        if self.name.trim().is_empty() {
            return Err(CourierError::InvalidTrigger("作业名称不能为空".to_string()));
        }

        let trigger = match (&self.every_seconds, &self.cron) {
            (Some(seconds), None) => TriggerSpec::every_seconds(*seconds)?,
            (None, Some(expression)) => {
                let zone_name = self.time_zone.as_deref().unwrap_or(default_time_zone);
                TriggerSpec::cron(expression, parse_time_zone(zone_name)?)?
            }
            (Some(_), Some(_)) => {
                return Err(CourierError::InvalidTrigger(format!(
                    "作业 {} 不能同时配置 every_seconds 和 cron",
                    self.name
                )))
            }
            (None, None) => {
                return Err(CourierError::InvalidTrigger(format!(
                    "作业 {} 必须配置 every_seconds 或 cron",
                    self.name
                )))
            }
        };

        Ok(JobDescriptor::new(self.name.clone(), trigger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(every_seconds: Option<u64>, cron: Option<&str>) -> JobConfig {
        JobConfig {
            name: "update-profile-inventory-values".to_string(),
            every_seconds,
            cron: cron.map(str::to_string),
            time_zone: None,
            enabled: true,
        }
    }

    #[test]
    fn test_route_config_to_descriptor() {
        let config = RouteConfig {
            message_type: "import-profile-friends".to_string(),
            destination: "import-profile-friends".to_string(),
            kind: DestinationKind::Queue,
            duplicate_window_seconds: 604_800,
            max_concurrency: 1,
        };
        let route = config.to_descriptor().unwrap();

        assert_eq!(route.duplicate_window, Duration::from_secs(604_800));
        assert!(!route.is_topic());
    }

    #[test]
    fn test_route_config_rejects_zero_concurrency() {
        let config = RouteConfig {
            message_type: "x".to_string(),
            destination: "x".to_string(),
            kind: DestinationKind::Queue,
            duplicate_window_seconds: 0,
            max_concurrency: 0,
        };
        assert!(config.to_descriptor().is_err());
    }

    #[test]
    fn test_job_config_interval_and_cron() {
        let descriptor = job(Some(5), None).to_descriptor("UTC").unwrap();
        assert_eq!(
            descriptor.trigger,
            TriggerSpec::Interval(Duration::from_secs(5))
        );

        let descriptor = job(None, Some("45 * * * *"))
            .to_descriptor("Europe/London")
            .unwrap();
        match descriptor.trigger {
            TriggerSpec::Cron {
                expression,
                time_zone,
            } => {
                assert_eq!(expression, "0 45 * * * *");
                assert_eq!(time_zone, chrono_tz::Europe::London);
            }
            other => panic!("expected cron trigger, got {other:?}"),
        }
    }

    #[test]
    fn test_job_config_requires_exactly_one_trigger() {
        assert!(job(None, None).to_descriptor("UTC").is_err());
        assert!(job(Some(5), Some("* * * * *")).to_descriptor("UTC").is_err());
        assert!(job(Some(0), None).to_descriptor("UTC").is_err());
    }

    #[test]
    fn test_job_time_zone_overrides_default() {
        let mut config = job(None, Some("0 0 9 * * *"));
        config.time_zone = Some("Australia/Sydney".to_string());
        let descriptor = config.to_descriptor("UTC").unwrap();

        assert!(matches!(
            descriptor.trigger,
            TriggerSpec::Cron { time_zone, .. } if time_zone == chrono_tz::Australia::Sydney
        ));
    }
}
