use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.orchestrator.scheduler();
    let status = if scheduler.is_shutdown() { "shutting_down" } else { "ok" };

    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "collector",
        "version": env!("CARGO_PKG_VERSION"),
        "active_batches": state.orchestrator.active_batches().len(),
        "running_jobs": scheduler.running_count(),
        "queue_depth": scheduler.queue_depth(),
    }))
}
