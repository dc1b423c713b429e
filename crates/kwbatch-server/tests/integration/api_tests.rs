use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use kwbatch_core::AppError;
use kwbatch_core::models::Provider;
use kwbatch_core::testutil::{MockBulkProvider, MockTrendProvider};

use crate::integration::common::{get_json, post_json, setup_test_app};

fn keywords(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("keyword {i}")).collect()
}

fn providers_for(names: &[String]) -> (MockBulkProvider, MockTrendProvider) {
    let mut ads = MockBulkProvider::new();
    let mut trends = MockTrendProvider::new();
    for (i, name) in names.iter().enumerate() {
        ads = ads.with_volume(name, 10 * i as i64);
        trends = trends.with_score(name, (i % 100) as f64);
    }
    (ads, trends)
}

#[tokio::test]
async fn healthz_returns_ok_with_timestamp() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, json) = get_json(&app.router, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["timestamp"].as_i64().unwrap() > 1_600_000_000);
}

#[tokio::test]
async fn batch_merges_cached_and_fetched_keywords() {
    let ads = MockBulkProvider::new()
        .with_volume("alpha", 100)
        .with_volume("beta", 200);
    let trends = MockTrendProvider::new()
        .with_score("alpha", 50.0)
        .with_score("beta", 75.0);
    let app = setup_test_app(ads.clone(), trends.clone());

    // Warm the cache for alpha only.
    let (status, _) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": ["alpha"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ads.calls(), 1);
    assert_eq!(trends.calls(), 1);

    let (status, json) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": ["alpha", "beta"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = json.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["keyword"], "alpha");
    assert_eq!(results[0]["adsAvgMonthlySearches"], 100);
    assert_eq!(results[0]["trendsScore"], 50.0);
    assert_eq!(results[1]["keyword"], "beta");
    assert_eq!(results[1]["adsAvgMonthlySearches"], 200);
    assert_eq!(results[1]["trendsScore"], 75.0);

    // Only beta reached the providers.
    assert_eq!(ads.calls(), 2);
    assert_eq!(ads.requested()[1].len(), 1);
    assert_eq!(trends.calls(), 2);
}

#[tokio::test]
async fn batch_normalizes_and_deduplicates_in_input_order() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, json) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": ["Beta", " alpha", "BETA", "alpha"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["keyword"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["beta", "alpha"]);
}

#[tokio::test]
async fn trend_failure_keeps_ads_value() {
    let ads = MockBulkProvider::new().with_volume("alpha", 100);
    let trends = MockTrendProvider::new()
        .with_score("alpha", 60.0)
        .fail_next(vec![AppError::fatal(Provider::Trends, "captcha")]);
    let app = setup_test_app(ads, trends);

    let (status, json) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": ["alpha"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["adsAvgMonthlySearches"], 100);
    assert!(json[0]["trendsScore"].is_null());
}

#[tokio::test]
async fn invalid_batches_return_422() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, json) =
        post_json(&app.router, "/batch_search_volume", json!({"keywords": []})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "validation_error");

    let (status, _) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": keywords(201)}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post_json(
        &app.router,
        "/batch_search_volume",
        json!({"keywords": ["ok", "   "]}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_body_is_a_client_error() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, _) = post_json(&app.router, "/batch_search_volume", json!({"words": ["a"]})).await;

    assert!(status.is_client_error(), "got {status}");
}

#[tokio::test]
async fn status_without_job_returns_404() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, json) = get_json(&app.router, "/async/status").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}

#[tokio::test]
async fn async_job_runs_to_completion() {
    let names = keywords(200);
    let (ads, trends) = providers_for(&names);
    let app = setup_test_app(ads, trends);

    let (status, receipt) = post_json(
        &app.router,
        "/async/batch_search_volume",
        json!({"keywords": names}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(receipt["keywordsCount"], 200);
    assert!(receipt["estimatedSeconds"].as_u64().unwrap() >= 1);
    let job_id = receipt["jobId"].as_str().unwrap().to_string();

    let mut snapshot = serde_json::Value::Null;
    for _ in 0..200 {
        let (status, json) = get_json(&app.router, "/async/status").await;
        assert_eq!(status, StatusCode::OK);

        let sum: u64 = ["pending", "processing", "completed", "failed"]
            .iter()
            .map(|k| json[*k].as_u64().unwrap())
            .sum();
        assert_eq!(sum, 200);

        snapshot = json;
        if snapshot["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["jobId"], job_id.as_str());
    assert_eq!(snapshot["completed"], 200);
    assert!(snapshot.get("keywords").is_none());

    let (status, filtered) = get_json(
        &app.router,
        &format!("/async/status?jobId={job_id}&keywords=keyword%201,keyword%202"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = filtered["keywords"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["keyword"], "keyword 1");
    assert_eq!(entries[0]["status"], "completed");
    assert_eq!(entries[0]["adsAvgMonthlySearches"], 10);
    assert_eq!(entries[1]["keyword"], "keyword 2");
}

#[tokio::test]
async fn second_submission_while_active_is_rejected() {
    let trends = MockTrendProvider::new().with_delay(Duration::from_millis(200));
    let app = setup_test_app(MockBulkProvider::new(), trends);

    let (status, first) = post_json(
        &app.router,
        "/async/batch_search_volume",
        json!({"keywords": ["alpha", "beta"]}),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, json) = post_json(
        &app.router,
        "/async/batch_search_volume",
        json!({"keywords": ["gamma"]}),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");

    let active = app.jobs.active_job().map(|id| id.to_string());
    assert_eq!(active.as_deref(), first["jobId"].as_str());
}

#[tokio::test]
async fn unknown_job_id_returns_404() {
    let app = setup_test_app(MockBulkProvider::new(), MockTrendProvider::new());

    let (status, json) = get_json(
        &app.router,
        "/async/status?jobId=00000000-0000-4000-8000-000000000000",
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");
}
