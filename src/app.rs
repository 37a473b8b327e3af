use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use collector_api::{create_app, AppState};
use collector_application::BatchOrchestrator;
use collector_core::config::AppConfig;
use collector_core::models::{BatchOptions, BatchSummary, CollectionMode};
use collector_dispatcher::JobScheduler;
use collector_infrastructure::{
    sink_from_config, AdaptiveRateLimiter, AutomationDriver, BrowserPool, BrowserSessionManager,
    ConnectionPool, HtmlScrapeSource, HttpConnectionManager, HttpPrimarySource, MetricsCollector,
    PrimaryDataSource, ResourcePool, ResultCache, ScrapeSource, WebDriverAutomation,
};
use collector_worker::{AutomationStrategy, PrimaryStrategy, ProgressiveCollector, ScrapingStrategy};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{info, warn};

/// 主应用程序：按配置装配采集引擎的全部组件
pub struct Application {
    config: AppConfig,
    orchestrator: BatchOrchestrator,
    connection_pool: ConnectionPool,
    browser_pool: BrowserPool,
    prometheus: Option<PrometheusHandle>,
}

impl Application {
    /// 创建新的应用实例；需要在安装指标记录器之后调用
    pub fn new(config: AppConfig, prometheus: Option<PrometheusHandle>) -> Result<Self> {
        info!("初始化采集引擎");
        let metrics = MetricsCollector::new();

        // 资源池
        let connection_manager =
            HttpConnectionManager::from_config(&config.sources).context("创建HTTP连接管理器失败")?;
        let connection_pool = ResourcePool::new(
            "http-connections",
            connection_manager,
            config.pool.connection_pool_size,
            config.pool.acquire_timeout(),
        );

        let driver: Arc<dyn AutomationDriver> = Arc::new(
            WebDriverAutomation::from_config(&config.sources).context("创建自动化驱动失败")?,
        );
        let browser_pool = ResourcePool::new(
            "browser-sessions",
            BrowserSessionManager::new(driver),
            config.pool.browser_pool_size,
            config.pool.acquire_timeout(),
        );

        // 数据来源与采集策略，升级顺序: 主接口 -> 浏览器自动化 -> 页面抓取
        let primary_source: Arc<dyn PrimaryDataSource> = Arc::new(
            HttpPrimarySource::from_config(&config.sources).context("创建主数据源失败")?,
        );
        let scrape_source: Arc<dyn ScrapeSource> =
            Arc::new(HtmlScrapeSource::from_config(&config.sources));

        let rate_limiter = AdaptiveRateLimiter::new(config.rate_limiter.clone());
        let collector = ProgressiveCollector::new(
            config.collector.clone(),
            Arc::new(PrimaryStrategy::new(primary_source, connection_pool.clone())),
            rate_limiter.clone(),
        )
        .with_fallback(Arc::new(AutomationStrategy::new(
            browser_pool.clone(),
            config.sources.record_page_template.clone(),
        )))
        .with_fallback(Arc::new(ScrapingStrategy::new(
            scrape_source,
            connection_pool.clone(),
        )))
        .with_metrics(metrics.clone());
        info!(fallbacks = ?collector.fallback_order(), "渐进式采集器已创建");

        let scheduler = JobScheduler::new(
            config.scheduler.clone(),
            Arc::new(collector),
            Arc::new(ResultCache::from_config(&config.cache)),
            rate_limiter,
        )
        .with_persistence(sink_from_config(&config.persistence))
        .with_metrics(metrics.clone());

        let orchestrator =
            BatchOrchestrator::new(config.batch.clone(), scheduler).with_metrics(metrics);

        Ok(Self {
            config,
            orchestrator,
            connection_pool,
            browser_pool,
            prometheus,
        })
    }

    /// 启动调度循环与批次清理循环
    pub fn start(&self) {
        self.orchestrator.scheduler().start();
        self.orchestrator.start();
        info!(
            max_concurrent_jobs = self.config.scheduler.max_concurrent_jobs,
            "采集引擎已启动"
        );
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &JobScheduler {
        self.orchestrator.scheduler()
    }

    /// 创建HTTP路由
    pub fn router(&self) -> Router {
        let mut state = AppState::new(self.orchestrator.clone())
            .with_pools(self.connection_pool.clone(), self.browser_pool.clone());
        if let Some(handle) = &self.prometheus {
            state = state.with_prometheus(
                handle.clone(),
                self.config.observability.metrics_endpoint.clone(),
            );
        }
        create_app(state, &self.config.api)
    }

    /// 运行API服务器，直到收到关闭信号
    pub async fn run_server(
        &self,
        bind_address: Option<&str>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        if !self.config.api.enabled {
            warn!("API服务器在配置中被禁用");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }

        let address = bind_address.unwrap_or(&self.config.api.bind_address);
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("绑定API服务器地址失败: {address}"))?;
        info!("API服务器监听地址: {}", address);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        Ok(())
    }

    /// 提交一个批次并等待汇总
    pub async fn collect(
        &self,
        identifiers: Vec<String>,
        task_type: &str,
        mode: CollectionMode,
        options: BatchOptions,
    ) -> Result<BatchSummary> {
        let batch_id = self
            .orchestrator
            .execute_batch(identifiers, task_type, mode, options)
            .context("提交批次失败")?;
        info!(batch_id = %batch_id, "批次已提交，等待完成");

        self.orchestrator
            .wait_for(batch_id)
            .await
            .with_context(|| format!("批次 {batch_id} 未产生汇总"))
    }

    /// 停止接收新批次，等待调度器退出并关闭资源池
    pub async fn shutdown(&self) {
        info!("关闭采集引擎");
        self.orchestrator.shutdown();
        self.orchestrator.scheduler().shutdown().await;
        self.connection_pool.close_all().await;
        self.browser_pool.close_all().await;
        info!("采集引擎已关闭");
    }
}
