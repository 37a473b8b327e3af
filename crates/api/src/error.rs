use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use collector_core::CollectorError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("采集引擎错误: {0}")]
    Collector(#[from] CollectorError),

    #[error("未找到资源: {0}")]
    NotFound(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("请求冲突: {0}")]
    Conflict(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Collector(error) => match error {
                CollectorError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CollectorError::InvalidIdentifier(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_IDENTIFIER")
                }
                CollectorError::Configuration(_) => (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR"),
                CollectorError::DuplicateJob { .. } => (StatusCode::CONFLICT, "DUPLICATE_JOB"),
                CollectorError::SchedulerShutdown => {
                    (StatusCode::SERVICE_UNAVAILABLE, "SCHEDULER_SHUTDOWN")
                }
                CollectorError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!(error = %self, "请求处理失败");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use collector_core::models::JobId;

    #[test]
    fn test_collector_error_status_mapping() {
        let cases = vec![
            (CollectorError::NotFound("x".to_string()), StatusCode::NOT_FOUND),
            (
                CollectorError::InvalidIdentifier("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CollectorError::Configuration("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CollectorError::DuplicateJob {
                    existing_job_id: JobId::new(),
                },
                StatusCode::CONFLICT,
            ),
            (CollectorError::SchedulerShutdown, StatusCode::SERVICE_UNAVAILABLE),
            (
                CollectorError::Timeout("request".to_string()),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                CollectorError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let response = ApiError::from(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_api_error_into_response() {
        assert_eq!(
            ApiError::NotFound("batch".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("empty".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("running".to_string()).into_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_api_error_display() {
        let error = ApiError::NotFound("batch 1".to_string());
        assert_eq!(error.to_string(), "未找到资源: batch 1");
    }
}
