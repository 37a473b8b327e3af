use anyhow::{Context, Result};
use collector_core::config::AppConfig;
use collector_core::logging::{LogConfig, LogLevel, OutputFormat};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 通用的应用启动配置
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

impl StartupConfig {
    /// 命令行参数优先于配置文件中的日志设置
    pub fn log_config(&self, config: &AppConfig) -> Result<LogConfig> {
        let mut log_config = LogConfig::from_observability(&config.observability);
        if let Some(level) = &self.log_level {
            let level: LogLevel = level.parse().context("无效的日志级别")?;
            log_config = log_config.with_level(level);
        }
        if let Some(format) = &self.log_format {
            let format: OutputFormat = format.parse().context("无效的日志格式")?;
            log_config = log_config.with_format(format);
        }
        Ok(log_config)
    }
}

/// 初始化日志系统，日志写到stderr，stdout留给命令输出
pub fn init_logging(log_config: &LogConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_config.level.as_directive()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_config.format {
        OutputFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        OutputFormat::Pretty => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        OutputFormat::Text => {
            registry
                .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init()
                .context("初始化文本日志格式失败")?;
        }
    }

    Ok(())
}

/// 加载应用配置
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置文件失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认>")
        )
    })?;
    Ok(config)
}

/// 安装全局Prometheus记录器；指标句柄需在此之后创建
pub fn install_metrics_exporter(config: &AppConfig) -> Result<Option<PrometheusHandle>> {
    if !config.observability.metrics_enabled {
        info!("指标导出已禁用");
        return Ok(None);
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")?;
    info!(endpoint = %config.observability.metrics_endpoint, "Prometheus指标记录器已安装");
    Ok(Some(handle))
}

/// 等待关闭信号
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
