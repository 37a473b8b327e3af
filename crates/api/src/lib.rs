//! # Collector API
//!
//! 采集引擎的HTTP接口，供状态消费方提交批次、轮询进度与获取汇总。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `POST /api/batches` - 提交批次
//! - `GET /api/batches/{id}` - 批次进度
//! - `GET /api/batches/{id}/results` - 批次汇总
//! - `POST /api/batches/{id}/cancel` - 取消批次
//! - `GET /api/jobs/{id}` - 单个任务状态
//! - `GET /api/stats` - 累计统计、调度器、缓存、限流器与资源池状态
//! - `GET /metrics` - Prometheus 指标（需安装导出器，路径可配置）
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "batch_id": "…", "total": 3 },
//!   "message": null,
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 错误响应为 `{"success": false, "error": {"type", "message", "code"}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use collector_core::config::ApiConfig;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, request_timeout, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let timeout = Duration::from_secs(config.request_timeout_seconds);
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(axum::middleware::from_fn(move |request: axum::extract::Request, next: axum::middleware::Next| {
                request_timeout(timeout, request, next)
            })),
    );
    if config.cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
