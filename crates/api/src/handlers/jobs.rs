use axum::extract::{Path, State};
use collector_core::models::JobId;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 查询单个任务状态
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let job_id: JobId = id.parse()?;
    let status = state
        .orchestrator
        .scheduler()
        .status(job_id)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;
    Ok(success(status))
}
