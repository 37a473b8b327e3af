use axum::{extract::State, http::header, response::IntoResponse};

use crate::{
    error::{ApiError, ApiResult},
    routes::AppState,
};

/// Prometheus 文本格式的指标
pub async fn render_metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let handle = state
        .prometheus
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("metrics exporter is not enabled".to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
