use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use kwbatch_core::{BulkMetricsProvider, CacheStore, TrendScoreProvider};

use crate::access::access_log;
use crate::dto::{BatchRequest, ErrorResponse, HealthResponse, StatusQuery};
use crate::error::ApiError;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router<B, T, S>(state: Arc<AppState<B, T, S>>) -> Router
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    Router::new()
        .route("/batch_search_volume", post(batch_search_volume::<B, T, S>))
        .route("/async/batch_search_volume", post(submit_batch::<B, T, S>))
        .route("/async/status", get(job_status::<B, T, S>))
        .route("/healthz", get(health))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

/// Resolve a batch synchronously. Provider failures and the global deadline
/// degrade to null fields; only malformed input is an error.
pub async fn batch_search_volume<B, T, S>(
    State(state): State<Arc<AppState<B, T, S>>>,
    axum::Json(body): axum::Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    let results = state.orchestrator.process(&body.keywords).await?;
    Ok(axum::Json(results))
}

// ---------------------------------------------------------------------------
// Async jobs
// ---------------------------------------------------------------------------

pub async fn submit_batch<B, T, S>(
    State(state): State<Arc<AppState<B, T, S>>>,
    axum::Json(body): axum::Json<BatchRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    let receipt = state.jobs.submit(&body.keywords)?;
    Ok((StatusCode::ACCEPTED, axum::Json(receipt)))
}

pub async fn job_status<B, T, S>(
    State(state): State<Arc<AppState<B, T, S>>>,
    Query(query): Query<StatusQuery>,
) -> Result<Response, ApiError>
where
    B: BulkMetricsProvider,
    T: TrendScoreProvider,
    S: CacheStore,
{
    let filter = query.keyword_filter();
    let snapshot = match query.job_id {
        Some(job_id) => Some(state.jobs.status(job_id, filter.as_deref())?),
        None => state.jobs.latest_status(filter.as_deref())?,
    };

    match snapshot {
        Some(snapshot) => Ok(axum::Json(snapshot).into_response()),
        None => {
            let body = ErrorResponse {
                error: "not_found".to_string(),
                message: "No job has been submitted".to_string(),
            };
            Ok((StatusCode::NOT_FOUND, axum::Json(body)).into_response())
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().timestamp(),
    })
}
