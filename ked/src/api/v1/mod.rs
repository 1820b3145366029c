pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod response;
pub mod router;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::NamedTempFile;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use crate::api::routes::create_router;
    use crate::api::state::AppState;
    use crate::config::{Config, RateLimitRule};
    use crate::db::{Database, DatabaseBackend, LibSqlBackend};
    use crate::embeddings::EmbeddingProvider;
    use crate::enrichment::sources::{QueryContext, SourceAdapter, SourceError};
    use crate::enrichment::{CircuitManager, Dispatcher, RateLimiter, SourceRegistry};
    use crate::llm::LlmProvider;
    use crate::models::Candidate;
    use crate::transcription::TranscriptionProvider;

    const KEY: &str = "test-key";

    struct SlowGithub {
        delay: Duration,
    }

    #[async_trait]
    impl SourceAdapter for SlowGithub {
        fn name(&self) -> &str {
            "github"
        }

        fn source_class(&self) -> &str {
            "datacenter"
        }

        async fn query(&self, _ctx: &QueryContext) -> Result<Vec<Candidate>, SourceError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![Candidate::new("github", "janedoe", "Jane Doe")
                .with_field("bio", "Distributed systems")])
        }
    }

    struct TestApp {
        state: AppState,
        _db: NamedTempFile,
    }

    impl TestApp {
        async fn new(api_keys: Vec<String>, delay: Duration) -> Self {
            let file = NamedTempFile::new().unwrap();
            let mut config = Config::default();
            config.server.api_keys = api_keys;
            config.database.url = format!("file:{}", file.path().display());
            config.database.local_path = None;
            config.sources.default_sources = vec!["github".to_string()];
            config.enrichment.dispatch.source_timeout_secs = 5;

            let db: Arc<dyn DatabaseBackend> = Arc::new(LibSqlBackend::new(
                Database::new(&config.database).await.unwrap(),
            ));

            let mut registry = SourceRegistry::new();
            registry.register(Arc::new(SlowGithub { delay }));
            let mut limits = HashMap::new();
            limits.insert(
                "github".to_string(),
                RateLimitRule {
                    limit: 60,
                    window_secs: 3600,
                },
            );
            let dispatcher = Dispatcher::new(
                Arc::new(registry),
                Arc::new(RateLimiter::new(&limits)),
                Arc::new(CircuitManager::new(config.enrichment.circuit.clone(), &[])),
                Duration::from_millis(500),
            );

            let state = AppState::with_dispatcher(
                config,
                db,
                EmbeddingProvider::unavailable("not configured in tests", 3),
                TranscriptionProvider::unavailable("not configured in tests"),
                LlmProvider::unavailable("not configured in tests"),
                dispatcher,
                CancellationToken::new(),
            )
            .unwrap();
            Self { state, _db: file }
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
            let response = create_router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    fn authed(
        method: &str,
        uri: &str,
        user: &str,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Authorization", format!("Bearer {KEY}"))
            .header("X-User-Id", user);
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn submission() -> serde_json::Value {
        serde_json::json!({
            "transcript": "Met Jane Doe at the meetup, she works on distributed systems",
            "embedding": [3.0, 4.0, 0.0],
            "nameHints": ["Jane Doe"]
        })
    }

    async fn wait_terminal(app: &TestApp, job_id: &str, user: &str) -> serde_json::Value {
        let uri = format!("/api/v1/enrichments/{job_id}");
        for _ in 0..200 {
            let (status, json) = app.call(authed("GET", &uri, user, None)).await;
            assert_eq!(status, StatusCode::OK);
            if json["data"]["terminal"] == true {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn protected_route_requires_auth() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/enrichments")
                    .header("content-type", "application/json")
                    .body(Body::from(submission().to_string()))
                    .unwrap(),
            )
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "unauthorized");
        assert!(json.get("data").is_none());
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new(vec!["secret".to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert_eq!(json["data"]["database"]["status"], "ok");
        assert_eq!(json["data"]["embeddings"]["status"], "unavailable");
        assert_eq!(json["data"]["llm"]["status"], "unavailable");
        assert_eq!(json["data"]["sources"]["registered"], 1);
        assert_eq!(json["data"]["jobs"]["inFlight"], 0);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn openapi_json_is_public_and_valid() {
        let app = TestApp::new(vec!["secret".to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(Request::builder().uri("/api/v1/openapi.json").body(Body::empty()).unwrap())
            .await;

        assert_eq!(status, StatusCode::OK);
        let version = json["openapi"]
            .as_str()
            .expect("openapi field should be a string");
        assert!(version.starts_with('3'), "got: {version}");
        assert!(json["paths"]["/api/v1/enrichments/{jobId}:cancel"].is_object());
    }

    #[tokio::test]
    async fn submit_then_poll_to_terminal() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(authed("POST", "/api/v1/enrichments", "alice", Some(submission())))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["data"]["stage"], "pending");
        let job_id = json["data"]["jobId"].as_str().unwrap().to_string();

        let done = wait_terminal(&app, &job_id, "alice").await;
        let data = &done["data"];
        assert_eq!(data["progressPercent"], 100);
        assert!(data["stage"] == "success" || data["stage"] == "partial");
        assert!(data["completedAt"].is_string());
        assert_eq!(data["result"]["dispatch"]["sources"][0]["source"], "github");
        assert_eq!(data["result"]["profile"]["components"][0], "transcript");
    }

    #[tokio::test]
    async fn jobs_are_scoped_to_their_owner() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (_, json) = app
            .call(authed("POST", "/api/v1/enrichments", "alice", Some(submission())))
            .await;
        let job_id = json["data"]["jobId"].as_str().unwrap().to_string();

        let (status, json) = app
            .call(authed("GET", &format!("/api/v1/enrichments/{job_id}"), "mallory", None))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn list_is_owner_scoped_with_stage_filter() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let mut ids = Vec::new();
        for user in ["alice", "alice", "mallory"] {
            let (_, json) = app
                .call(authed("POST", "/api/v1/enrichments", user, Some(submission())))
                .await;
            let job_id = json["data"]["jobId"].as_str().unwrap().to_string();
            ids.push((job_id, user));
        }
        let mut final_stage = serde_json::Value::Null;
        for (job_id, user) in &ids {
            final_stage = wait_terminal(&app, job_id, user).await["data"]["stage"].clone();
        }

        let (status, json) = app.call(authed("GET", "/api/v1/enrichments", "alice", None)).await;
        assert_eq!(status, StatusCode::OK);
        let listed = json["data"]["enrichments"].as_array().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|job| job["terminal"] == true && job.get("result").is_none()));
        assert!(listed.iter().all(|job| job["jobId"] != ids[2].0.as_str()));
        assert_eq!(json["meta"]["total"], 2);
        assert_eq!(json["data"]["counts"][0]["count"], 2);

        let uri = format!("/api/v1/enrichments?stage={}&limit=1", final_stage.as_str().unwrap());
        let (status, json) = app.call(authed("GET", &uri, "alice", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["enrichments"].as_array().unwrap().len(), 1);
        assert_eq!(json["meta"]["total"], 2);

        let (status, json) = app
            .call(authed("GET", "/api/v1/enrichments?stage=running", "alice", None))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");

        let (_, json) = app
            .call(authed("GET", "/api/v1/enrichments?stage=pending", "nobody", None))
            .await;
        assert!(json["data"]["enrichments"].as_array().unwrap().is_empty());
        assert_eq!(json["meta"]["total"], 0);
    }

    #[tokio::test]
    async fn invalid_submission_is_rejected() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(authed(
                "POST",
                "/api/v1/enrichments",
                "alice",
                Some(serde_json::json!({ "nameHints": ["Jane"] })),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");

        let malformed = Request::builder()
            .method("POST")
            .uri("/api/v1/enrichments")
            .header("Authorization", format!("Bearer {KEY}"))
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = app.call(malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "invalid_request");
    }

    #[tokio::test]
    async fn cancel_running_job() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::from_millis(400)).await;

        let (_, json) = app
            .call(authed("POST", "/api/v1/enrichments", "alice", Some(submission())))
            .await;
        let job_id = json["data"]["jobId"].as_str().unwrap().to_string();

        let (status, json) = app
            .call(authed("POST", &format!("/api/v1/enrichments/{job_id}:cancel"), "alice", None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["jobId"], job_id.as_str());
        assert_eq!(json["data"]["cancelRequested"], true);

        let done = wait_terminal(&app, &job_id, "alice").await;
        assert_eq!(done["data"]["stage"], "cancelled");
        assert!(done["data"].get("result").is_none());

        // A second cancel is a no-op on the terminal job.
        let (status, json) = app
            .call(authed("POST", &format!("/api/v1/enrichments/{job_id}:cancel"), "alice", None))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["stage"], "cancelled");
        assert_eq!(json["data"]["terminal"], true);
    }

    #[tokio::test]
    async fn unknown_action_is_not_found() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (status, json) = app
            .call(authed("POST", "/api/v1/enrichments/abc:retry", "alice", None))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");

        let (status, _) = app
            .call(authed("POST", "/api/v1/enrichments/missing:cancel", "alice", None))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sources_lists_registry_with_quota() {
        let app = TestApp::new(vec![KEY.to_string()], Duration::ZERO).await;

        let (status, json) = app.call(authed("GET", "/api/v1/sources", "alice", None)).await;

        assert_eq!(status, StatusCode::OK);
        let sources = json["data"]["sources"].as_array().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0]["name"], "github");
        assert_eq!(sources[0]["available"], true);
        assert_eq!(sources[0]["defaultEnabled"], true);
        assert_eq!(sources[0]["rateLimitRemaining"], 60);
        assert_eq!(json["meta"]["total"], 1);
    }
}
