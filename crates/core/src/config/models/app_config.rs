use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    broker::BrokerConfig,
    dispatcher_scheduler::{DispatcherConfig, SchedulerConfig},
    observability::ObservabilityConfig,
    routing::{JobConfig, RouteConfig},
};
use crate::models::JobDescriptor;
use crate::routing::RouteRegistry;

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub scheduler: SchedulerConfig,
    pub broker: BrokerConfig,
    pub observability: ObservabilityConfig,
    pub routes: Vec<RouteConfig>,
    pub jobs: Vec<JobConfig>,
}

impl AppConfig {
    /// 加载配置
    ///
    /// 加载顺序：
    /// 1. 结构体默认值
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀 `COURIER_`，层级分隔符 `__`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/courier.toml", "courier.toml", "/etc/courier/config.toml"];

            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置有效性，路由表与作业描述在这里完整构建一次以便尽早失败
    pub fn validate(&self) -> Result<()> {
        self.dispatcher
            .validate()
            .context("Dispatcher配置验证失败")?;
        self.scheduler.validate().context("Scheduler配置验证失败")?;
        self.broker.validate().context("消息代理配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        self.route_registry().context("路由配置验证失败")?;
        self.job_descriptors().context("作业配置验证失败")?;

        Ok(())
    }

    pub fn route_registry(&self) -> Result<RouteRegistry> {
        Ok(RouteRegistry::from_config(&self.routes)?)
    }

    /// 已启用作业的描述列表，名称必须唯一
    pub fn job_descriptors(&self) -> Result<Vec<JobDescriptor>> {
        let mut names = HashSet::new();
        let mut descriptors = Vec::new();

        for job in &self.jobs {
            if !names.insert(job.name.as_str()) {
                return Err(anyhow::anyhow!("作业名称重复: {}", job.name));
            }
            if !job.enabled {
                continue;
            }
            descriptors.push(job.to_descriptor(&self.scheduler.default_time_zone)?);
        }

        Ok(descriptors)
    }
}
