use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use kwbatch_core::job_manager::JobConfig;
use kwbatch_core::store::MemoryStore;
use kwbatch_core::testutil::{MockBulkProvider, MockReporter, MockTrendProvider, test_orchestrator};
use kwbatch_core::JobManager;
use kwbatch_server::routes;
use kwbatch_server::state::AppState;

pub type TestJobs = JobManager<MockBulkProvider, MockTrendProvider, MemoryStore>;

pub struct TestApp {
    pub router: Router,
    pub jobs: Arc<TestJobs>,
    pub cancel: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Router over mock providers with an in-memory cache and a running worker pool.
pub fn setup_test_app(ads: MockBulkProvider, trends: MockTrendProvider) -> TestApp {
    let orchestrator = Arc::new(test_orchestrator(ads, trends));
    let jobs = Arc::new(JobManager::new(
        orchestrator.clone(),
        JobConfig {
            chunk_size: 20,
            workers: 2,
            max_keywords: 200,
            chunk_delay: Duration::ZERO,
        },
        Arc::new(MockReporter::new()),
    ));
    let cancel = CancellationToken::new();
    jobs.spawn_workers(&cancel);

    let state = Arc::new(AppState::new(orchestrator, jobs.clone()));
    TestApp {
        router: routes::router(state),
        jobs,
        cancel,
    }
}

pub async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(router, request).await
}

pub async fn get_json(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}
