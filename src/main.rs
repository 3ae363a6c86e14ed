use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use courier::{Application, ShutdownManager};
use courier_core::AppConfig;
use courier_infrastructure::MetricsCollector;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 等待各组件宽限期之外额外留出的时间
const SHUTDOWN_MARGIN_SECONDS: u64 = 10;

#[derive(Debug, Parser)]
#[command(name = "courier", version, about = "声明式消息分发与防重叠作业调度运行时")]
struct Cli {
    /// 配置文件路径，未指定时依次查找 config/courier.toml、courier.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件中的 observability.log_level
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty"], default_value = "pretty")]
    log_format: String,

    /// 仅校验配置后退出
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    init_logging(&log_level, &cli.log_format)?;

    info!("启动 courier");
    if let Some(path) = &cli.config {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        init_metrics_exporter(&config.observability.metrics_bind_address)?;
    }

    let shutdown_timeout = Duration::from_secs(
        config
            .dispatcher
            .shutdown_grace_seconds
            .max(config.scheduler.shutdown_grace_seconds)
            + SHUTDOWN_MARGIN_SECONDS,
    );

    let app = Application::new(config)?;
    if cli.check {
        app.validate()?;
        info!("配置校验通过");
        return Ok(());
    }

    let shutdown_manager = ShutdownManager::new();
    let handle = app.start(&shutdown_manager.token()).await?;

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if shutdown_manager
        .shutdown_within(shutdown_timeout, handle.wait())
        .await
    {
        info!("应用已优雅关闭");
    }

    info!("courier 已退出");
    Ok(())
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 安装 Prometheus 导出器并注册指标描述
fn init_metrics_exporter(bind_address: &str) -> Result<()> {
    let address: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("指标监听地址无效: {bind_address}"))?;

    let (recorder, exporter) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(address)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus exporter: {}", e))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            error!("Prometheus exporter stopped: {:?}", e);
        }
    });

    MetricsCollector::describe();
    info!("Prometheus 指标导出已启用: http://{address}/metrics");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
