use axum::extract::State;
use collector_application::StatisticsSnapshot;
use collector_infrastructure::{CacheStats, PoolStats, RateLimiterSnapshot};
use serde::Serialize;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Serialize)]
pub struct SchedulerStats {
    pub running: usize,
    pub peak_running: usize,
    pub queue_depth: usize,
    pub active_jobs: usize,
}

/// 系统统计信息
#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub aggregate: StatisticsSnapshot,
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
    pub rate_limiter: Vec<RateLimiterSnapshot>,
    pub pools: Vec<PoolStats>,
    pub active_batches: usize,
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    let scheduler = state.orchestrator.scheduler();

    let mut pools = Vec::new();
    if let Some(pool) = &state.connection_pool {
        pools.push(pool.stats());
    }
    if let Some(pool) = &state.browser_pool {
        pools.push(pool.stats());
    }

    Ok(success(SystemStats {
        aggregate: state.orchestrator.statistics(),
        scheduler: SchedulerStats {
            running: scheduler.running_count(),
            peak_running: scheduler.peak_running(),
            queue_depth: scheduler.queue_depth(),
            active_jobs: scheduler.active_count(),
        },
        cache: scheduler.cache().stats(),
        rate_limiter: scheduler.rate_limiter().snapshots().await,
        pools,
        active_batches: state.orchestrator.active_batches().len(),
    }))
}
