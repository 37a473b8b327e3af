#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use collector::Application;
    use collector_core::config::AppConfig;
    use collector_core::models::{BatchOptions, BatchState, CollectionMode, JobStage};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn record_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/records/details/[^/]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bedrooms": 3})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/records/[^/]+$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"owner": "Smith"})))
            .mount(&server)
            .await;
        server
    }

    fn config_for(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.sources.primary_base_url = format!("{}/api", server.uri());
        config.scheduler.dispatch_poll_interval_ms = 5;
        config
    }

    #[tokio::test]
    async fn test_collect_detailed_batch_end_to_end() {
        let server = record_server().await;
        let app = Application::new(config_for(&server), None).unwrap();
        app.start();

        let summary = tokio::time::timeout(
            Duration::from_secs(10),
            app.collect(
                vec!["101".to_string(), "102".to_string()],
                "record",
                CollectionMode::Detailed,
                BatchOptions::default(),
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.state, BatchState::Completed);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.failed, 0);
        for item in &summary.items {
            assert!(item.success);
            assert_eq!(item.reached_stage, Some(JobStage::Detailed));
            assert_eq!(item.completion_percentage, 66);
            let result = item.result.as_ref().unwrap();
            assert_eq!(result.data["owner"], json!("Smith"));
            assert_eq!(result.data["bedrooms"], json!(3));
        }

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_router_serves_health_and_stats() {
        let server = record_server().await;
        let app = Application::new(config_for(&server), None).unwrap();
        app.start();

        let response = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .router()
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value =
            serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await.unwrap())
                .unwrap();
        assert_eq!(body["data"]["pools"].as_array().unwrap().len(), 2);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_collect_after_shutdown_fails() {
        let server = record_server().await;
        let app = Application::new(config_for(&server), None).unwrap();
        app.start();
        app.shutdown().await;

        let result = app
            .collect(
                vec!["101".to_string()],
                "record",
                CollectionMode::Basic,
                BatchOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_primary_url_rejected() {
        let mut config = AppConfig::default();
        config.sources.primary_base_url = "not a url".to_string();
        assert!(Application::new(config, None).is_err());
    }
}
