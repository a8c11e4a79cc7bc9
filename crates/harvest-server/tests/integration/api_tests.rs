use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::integration::common::{TestApp, send, setup_test_app, spawn_worker};

async fn count(app: &TestApp, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(&app.pool).await.unwrap()
}

/// Poll the batch status until it leaves `scraping`.
async fn wait_for_batch(app: &TestApp, id: &str) -> serde_json::Value {
    for _ in 0..100 {
        let (status, body) = send(app, "GET", &format!("/v1/batch/scrape/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "scraping" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("batch {id} never finished");
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["queued"], 0);
}

#[tokio::test]
async fn missing_team_header_returns_400() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::post("/v1/scrape")
                .header("content-type", "application/json")
                .body(Body::from(json!({"url": "https://example.com"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scrape_without_url_returns_400() {
    let app = setup_test_app().await;

    let (status, body) = send(&app, "POST", "/v1/scrape", Some(json!({"formats": ["markdown"]}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn scrape_returns_document_and_bills_one_credit() {
    let app = setup_test_app().await;
    let worker = spawn_worker(&app);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/scrape",
        Some(json!({"url": "https://example.com", "formats": ["markdown"], "timeout": 10000})),
    )
    .await;
    worker.cancel();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["markdown"], "# https://example.com");
    assert_eq!(body["credits_used"], 1);

    assert_eq!(count(&app, "SELECT COUNT(*) FROM requests WHERE kind = 'scrape'").await, 1);
    assert_eq!(
        count(&app, "SELECT COUNT(*) FROM scrapes WHERE is_successful AND credits_cost = 1").await,
        1
    );
    // Finished sync scrapes do not linger in the queue.
    assert_eq!(count(&app, "SELECT COUNT(*) FROM jobs").await, 0);
}

#[tokio::test]
async fn scrape_timeout_returns_408_and_removes_job() {
    let app = setup_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/scrape",
        Some(json!({"url": "https://example.com", "timeout": 200})),
    )
    .await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "SCRAPE_TIMEOUT");
    assert_eq!(count(&app, "SELECT COUNT(*) FROM jobs").await, 0);
    assert_eq!(
        count(&app, "SELECT COUNT(*) FROM scrapes WHERE NOT is_successful AND credits_cost = 0").await,
        1
    );
}

#[tokio::test]
async fn failed_scrape_keeps_its_error_code() {
    let app = setup_test_app().await;
    let worker = spawn_worker(&app);

    let (status, body) = send(
        &app,
        "POST",
        "/v1/scrape",
        Some(json!({"url": "https://fail.example", "timeout": 10000})),
    )
    .await;
    worker.cancel();

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "SCRAPE_ACTION_ERROR");
    assert_eq!(body["error"], "Action 1 failed: element not found");
}

#[tokio::test]
async fn batch_scrape_completes_and_is_billed_once() {
    let app = setup_test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/v1/batch/scrape",
        Some(json!({
            "urls": ["https://a.example", "https://b.example", "https://fail.example"],
            "formats": ["markdown"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();

    let worker = spawn_worker(&app);
    let progress = wait_for_batch(&app, &id).await;
    worker.cancel();

    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["total"], 3);
    assert_eq!(progress["completed"], 2);
    assert_eq!(progress["failed"], 1);
    assert_eq!(progress["credits_used"], 2);
    assert_eq!(progress["data"].as_array().unwrap().len(), 2);

    // Polling again must not write a second outcome.
    send(&app, "GET", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(count(&app, "SELECT COUNT(*) FROM batch_scrapes").await, 1);

    // Cancelling a finished batch is a conflict.
    let (status, body) = send(&app, "DELETE", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Cannot cancel job that has already completed");
}

#[tokio::test]
async fn cancel_batch_then_conflict() {
    let app = setup_test_app().await;

    let (_, body) = send(
        &app,
        "POST",
        "/v1/batch/scrape",
        Some(json!({"urls": ["https://a.example", "https://b.example"]})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, "GET", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "scraping");
    assert_eq!(body["total"], 2);

    let (status, body) = send(&app, "DELETE", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = send(&app, "GET", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancelled"], 2);
    assert_eq!(body["credits_used"], 0);

    let (status, _) = send(&app, "DELETE", &format!("/v1/batch/scrape/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let cancelled: bool = sqlx::query_scalar("SELECT cancelled FROM batch_scrapes")
        .fetch_one(&app.pool)
        .await
        .unwrap();
    assert!(cancelled);
}

#[tokio::test]
async fn batch_of_another_team_is_not_found() {
    let app = setup_test_app().await;

    let (_, body) = send(
        &app,
        "POST",
        "/v1/batch/scrape",
        Some(json!({"urls": ["https://a.example"]})),
    )
    .await;
    let id = body["id"].as_str().unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::delete(format!("/v1/batch/scrape/{id}"))
                .header("x-team-id", "someone-else")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_batch_returns_400() {
    let app = setup_test_app().await;

    let (status, _) = send(&app, "POST", "/v1/batch/scrape", Some(json!({"urls": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_child_job_is_visible_to_its_team() {
    let app = setup_test_app().await;

    let (_, body) = send(
        &app,
        "POST",
        "/v1/batch/scrape",
        Some(json!({"urls": ["https://a.example"]})),
    )
    .await;
    let batch_id = body["id"].as_str().unwrap().to_string();
    let job_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM jobs LIMIT 1")
        .fetch_one(&app.pool)
        .await
        .unwrap();

    let (status, body) = send(&app, "GET", &format!("/v1/jobs/{job_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "queued");
    assert_eq!(body["kind"], "scrape");
    assert_eq!(body["batch_id"], batch_id);
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;

    let (status, body) = send(
        &app,
        "GET",
        &format!("/v1/jobs/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
