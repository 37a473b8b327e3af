use axum::{
    extract::{Path, State},
    Json,
};
use collector_core::models::{BatchId, BatchOptions, CollectionMode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, success},
    routes::AppState,
};

/// 批次创建请求
#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub identifiers: Vec<String>,
    pub task_type: String,
    #[serde(default)]
    pub mode: CollectionMode,
    #[serde(default)]
    pub options: BatchOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchCreated {
    pub batch_id: BatchId,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchCancelled {
    pub batch_id: BatchId,
    pub cancelled: bool,
}

fn parse_batch_id(id: &str) -> ApiResult<BatchId> {
    Ok(id.parse()?)
}

/// 提交批次
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    if request.identifiers.is_empty() {
        return Err(ApiError::BadRequest("identifiers must not be empty".to_string()));
    }
    if request.task_type.trim().is_empty() {
        return Err(ApiError::BadRequest("task_type must not be empty".to_string()));
    }

    let total = request.identifiers.len();
    let batch_id = state.orchestrator.execute_batch(
        request.identifiers,
        &request.task_type,
        request.mode,
        request.options,
    )?;
    info!(batch_id = %batch_id, total = total, "Batch submitted via API");

    Ok(accepted(BatchCreated { batch_id, total }))
}

/// 查询批次进度
pub async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let batch_id = parse_batch_id(&id)?;
    let progress = state
        .orchestrator
        .get_status(batch_id)
        .ok_or_else(|| ApiError::NotFound(format!("batch {batch_id}")))?;
    Ok(success(progress))
}

/// 获取批次汇总，批次仍在运行时返回冲突
pub async fn get_batch_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let batch_id = parse_batch_id(&id)?;
    match state.orchestrator.get_results(batch_id) {
        Some(summary) => Ok(success(summary)),
        None if state.orchestrator.get_status(batch_id).is_some() => Err(ApiError::Conflict(
            format!("batch {batch_id} is still running"),
        )),
        None => Err(ApiError::NotFound(format!("batch {batch_id}"))),
    }
}

pub async fn cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let batch_id = parse_batch_id(&id)?;
    if state.orchestrator.get_status(batch_id).is_none() {
        return Err(ApiError::NotFound(format!("batch {batch_id}")));
    }
    let cancelled = state.orchestrator.cancel_batch(batch_id);
    Ok(success(BatchCancelled { batch_id, cancelled }))
}
