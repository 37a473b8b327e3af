use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use collector::common::wait_for_shutdown_signal;
use collector::{
    init_logging, install_metrics_exporter, load_config, Application, ShutdownManager,
    StartupConfig,
};
use collector_core::models::{BatchOptions, CollectionMode, Priority};
use tracing::{error, info, warn};

/// 渐进式记录采集引擎
#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(version)]
#[command(about = "渐进式记录采集引擎")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，缺省时尝试 config/collector.toml
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 日志格式 (json, pretty, text)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动HTTP服务
    Serve {
        /// 覆盖配置中的监听地址
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// 采集一批标识并输出JSON汇总
    Collect {
        /// 任务类型
        #[arg(short, long, default_value = "record")]
        task_type: String,
        /// 采集模式 (basic, detailed, complete)
        #[arg(short, long, default_value = "complete")]
        mode: CollectionMode,
        /// 优先级 (critical, high, normal, low)
        #[arg(short, long, default_value = "normal")]
        priority: Priority,
        /// 批次内并发上限
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// 单个标识的超时（毫秒）
        #[arg(long)]
        per_request_timeout_ms: Option<u64>,
        /// 批次总超时（毫秒），0 表示使用配置默认值
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
        /// 跳过缓存
        #[arg(long)]
        force_fresh: bool,
        /// 要采集的标识
        #[arg(required = true)]
        identifiers: Vec<String>,
    },
    /// 输出生效的配置
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let startup = StartupConfig {
        config_path: cli.config.clone(),
        log_level: cli.log_level.clone(),
        log_format: cli.log_format.clone(),
    };

    let config = load_config(&startup)?;
    init_logging(&startup.log_config(&config)?)?;

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Collect {
            task_type,
            mode,
            priority,
            max_concurrency,
            per_request_timeout_ms,
            timeout_ms,
            force_fresh,
            identifiers,
        } => {
            let options = BatchOptions {
                priority,
                max_concurrency,
                per_request_timeout_ms,
                total_timeout_ms: timeout_ms,
                force_fresh,
            };
            let app = Application::new(config, None)?;
            app.start();
            let summary = app.collect(identifiers, &task_type, mode, options).await;
            app.shutdown().await;

            let summary = summary?;
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("序列化批次汇总失败")?
            );
            Ok(())
        }
        Commands::Config => {
            println!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn serve(config: collector_core::config::AppConfig, bind: Option<String>) -> Result<()> {
    info!("启动采集引擎服务");

    let prometheus = install_metrics_exporter(&config)?;
    let grace = std::time::Duration::from_secs(config.scheduler.shutdown_grace_seconds + 5);
    let app = Arc::new(Application::new(config, prometheus)?);
    app.start();

    let shutdown_manager = ShutdownManager::with_grace_period(grace);
    let mut server_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run_server(bind.as_deref(), shutdown_rx).await {
                error!("API服务器运行失败: {e:#}");
            }
        })
    };

    let server_exited = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
            false
        }
        _ = &mut server_handle => {
            warn!("API服务器提前退出，开始关闭");
            true
        }
    };

    shutdown_manager.shutdown().await;
    if !server_exited {
        shutdown_manager.drain("API服务器", server_handle).await;
    }
    shutdown_manager.drain("采集引擎", app.shutdown()).await;

    info!("采集引擎服务已退出");
    Ok(())
}
