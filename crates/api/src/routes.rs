use axum::{
    routing::{get, post},
    Router,
};
use collector_application::BatchOrchestrator;
use collector_infrastructure::{BrowserPool, ConnectionPool};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::{
    batches::{cancel_batch, create_batch, get_batch, get_batch_results},
    health::health_check,
    jobs::get_job,
    metrics::render_metrics,
    stats::get_stats,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BatchOrchestrator,
    pub connection_pool: Option<ConnectionPool>,
    pub browser_pool: Option<BrowserPool>,
    /// Present when a Prometheus recorder is installed
    pub prometheus: Option<PrometheusHandle>,
    pub metrics_path: String,
}

impl AppState {
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        Self {
            orchestrator,
            connection_pool: None,
            browser_pool: None,
            prometheus: None,
            metrics_path: "/metrics".to_string(),
        }
    }

    pub fn with_pools(mut self, connections: ConnectionPool, browsers: BrowserPool) -> Self {
        self.connection_pool = Some(connections);
        self.browser_pool = Some(browsers);
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle, path: impl Into<String>) -> Self {
        self.prometheus = Some(handle);
        self.metrics_path = path.into();
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    let metrics_path = state.metrics_path.clone();
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 批次API
        .route("/api/batches", post(create_batch))
        .route("/api/batches/{id}", get(get_batch))
        .route("/api/batches/{id}/results", get(get_batch_results))
        .route("/api/batches/{id}/cancel", post(cancel_batch))
        // 任务查询
        .route("/api/jobs/{id}", get(get_job))
        // 监控
        .route("/api/stats", get(get_stats))
        .route(&metrics_path, get(render_metrics))
        .with_state(state)
}
