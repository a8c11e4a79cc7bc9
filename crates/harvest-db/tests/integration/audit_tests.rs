use chrono::{DateTime, Utc};
use harvest_core::audit::{
    AuditConfig, AuditLogger, BatchScrapeLog, ExtractLog, LoggedRequest, REDACTED, ScrapeLog,
};
use harvest_core::error::AppError;
use harvest_core::job::JobKind;
use harvest_core::models::{ChangeTrackingEntry, MapRecord, ModelKind, OutcomeRecord};
use harvest_core::options::ScrapeOptions;
use harvest_core::traits::{AuditSink, ContentStore};
use harvest_db::AuditRepository;
use sqlx::PgPool;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

/// Content store that accepts and drops everything.
#[derive(Clone)]
struct DiscardStore;

impl ContentStore for DiscardStore {
    async fn save(
        &self,
        _kind: JobKind,
        _id: Uuid,
        _content: &serde_json::Value,
    ) -> Result<(), AppError> {
        Ok(())
    }
}

fn logger(pool: PgPool, change_tracking: bool) -> AuditLogger<AuditRepository, DiscardStore> {
    AuditLogger::new(
        Some(AuditRepository::new(pool)),
        Some(DiscardStore),
        AuditConfig { change_tracking },
    )
}

fn scrape_log(id: Uuid, url: &str) -> ScrapeLog {
    ScrapeLog {
        id,
        url: url.into(),
        is_successful: true,
        error: None,
        document: Some(serde_json::json!({"markdown": "# hi"})),
        time_taken: 1.25,
        options: ScrapeOptions::default(),
        cost_tracking: None,
        pdf_num_pages: Some(3),
        credits_cost: 1,
    }
}

#[tokio::test]
async fn scrape_request_and_outcome_are_persisted() {
    let (pool, _container) = setup_test_db().await;
    let audit = logger(pool.clone(), false);

    let receipt = audit
        .log_request(LoggedRequest::new(
            JobKind::Scrape,
            "team-a",
            "https://example.com",
        ))
        .await
        .unwrap();
    let request_id = receipt.request_id();
    let scrape_id = Uuid::new_v4();
    audit
        .log_scrape(receipt, scrape_log(scrape_id, "https://example.com"))
        .await
        .unwrap();

    let (kind, target_hint, dr_clean_by): (String, String, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT kind, target_hint, dr_clean_by FROM requests WHERE id = $1")
            .bind(request_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(kind, "scrape");
    assert_eq!(target_hint, "https://example.com");
    assert!(dr_clean_by.is_none());

    let (url, pages, credits, linked): (String, Option<i32>, i64, Uuid) = sqlx::query_as(
        "SELECT url, pdf_num_pages, credits_cost, request_id FROM scrapes WHERE id = $1",
    )
    .bind(scrape_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(url, "https://example.com");
    assert_eq!(pages, Some(3));
    assert_eq!(credits, 1);
    assert_eq!(linked, request_id);
}

#[tokio::test]
async fn zero_data_retention_redacts_and_schedules_cleanup() {
    let (pool, _container) = setup_test_db().await;
    let audit = logger(pool.clone(), false);

    let receipt = audit
        .log_request(
            LoggedRequest::new(JobKind::Scrape, "team-a", "https://secret.example")
                .with_zero_data_retention(true),
        )
        .await
        .unwrap();
    let request_id = receipt.request_id();
    let scrape_id = Uuid::new_v4();
    audit
        .log_scrape(receipt, scrape_log(scrape_id, "https://secret.example"))
        .await
        .unwrap();

    let (target_hint, created_at, dr_clean_by): (String, DateTime<Utc>, Option<DateTime<Utc>>) =
        sqlx::query_as("SELECT target_hint, created_at, dr_clean_by FROM requests WHERE id = $1")
            .bind(request_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(target_hint, REDACTED);
    let window = dr_clean_by.expect("cleanup scheduled") - created_at;
    assert_eq!(window.num_hours(), 24);

    let (url, options, pages): (String, Option<serde_json::Value>, Option<i32>) =
        sqlx::query_as("SELECT url, options, pdf_num_pages FROM scrapes WHERE id = $1")
            .bind(scrape_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(url, REDACTED);
    assert!(options.is_none());
    assert!(pages.is_none());
}

#[tokio::test]
async fn change_tracking_goes_through_stored_function() {
    let (pool, _container) = setup_test_db().await;
    let audit = logger(pool.clone(), true);

    let receipt = audit
        .log_request(LoggedRequest::new(
            JobKind::Scrape,
            "team-a",
            "https://example.com",
        ))
        .await
        .unwrap();
    let scrape_id = Uuid::new_v4();
    let mut scrape = scrape_log(scrape_id, "https://example.com");
    scrape.options = ScrapeOptions::from_payload(&serde_json::json!({
        "formats": ["markdown", {"type": "changeTracking", "tag": "daily"}]
    }));
    audit.log_scrape(receipt, scrape).await.unwrap();

    let (team_id, url, tag): (String, String, Option<String>) = sqlx::query_as(
        "SELECT team_id, url, tag FROM change_tracking_scrapes WHERE scrape_id = $1",
    )
    .bind(scrape_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(team_id, "team-a");
    assert_eq!(url, "https://example.com");
    assert_eq!(tag.as_deref(), Some("daily"));
}

#[tokio::test]
async fn batch_and_extract_outcomes_are_persisted() {
    let (pool, _container) = setup_test_db().await;
    let audit = logger(pool.clone(), false);

    let batch_id = Uuid::new_v4();
    let mut request = LoggedRequest::new(JobKind::BatchScrape, "team-a", "https://a.example");
    request.id = batch_id;
    let receipt = audit.log_request(request).await.unwrap();
    audit
        .log_batch_scrape(
            receipt,
            BatchScrapeLog {
                id: batch_id,
                num_docs: 4,
                credits_cost: 4,
                cancelled: true,
            },
        )
        .await
        .unwrap();

    let (num_docs, cancelled): (i32, bool) =
        sqlx::query_as("SELECT num_docs, cancelled FROM batch_scrapes WHERE id = $1")
            .bind(batch_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(num_docs, 4);
    assert!(cancelled);

    let extract_id = Uuid::new_v4();
    let receipt = audit
        .log_request(LoggedRequest::new(
            JobKind::Extract,
            "team-a",
            "https://a.example",
        ))
        .await
        .unwrap();
    audit
        .log_extract(
            receipt,
            ExtractLog {
                id: extract_id,
                urls: vec!["https://a.example".into(), "https://b.example".into()],
                options: None,
                model_kind: ModelKind::Fire1,
                credits_cost: 50,
                is_successful: true,
                error: None,
                result: None,
                cost_tracking: None,
            },
        )
        .await
        .unwrap();

    let (urls, model_kind): (Vec<String>, String) =
        sqlx::query_as("SELECT urls, model_kind FROM extracts WHERE id = $1")
            .bind(extract_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(urls.len(), 2);
    assert_eq!(model_kind, "fire-1");
}

#[tokio::test]
async fn outcome_without_request_is_rejected() {
    let (pool, _container) = setup_test_db().await;
    let repo = AuditRepository::new(pool);

    let orphan = OutcomeRecord::Map(MapRecord {
        id: Uuid::new_v4(),
        request_id: Uuid::new_v4(),
        url: "https://example.com".into(),
        team_id: "team-a".into(),
        options: None,
        num_results: 12,
        credits_cost: 1,
    });
    let err = repo.insert_outcome(&orphan).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
}

#[tokio::test]
async fn track_change_accepts_untagged_entries() {
    let (pool, _container) = setup_test_db().await;
    let repo = AuditRepository::new(pool.clone());

    repo.track_change(&ChangeTrackingEntry {
        team_id: "team-a".into(),
        url: "https://example.com".into(),
        scrape_id: Uuid::new_v4(),
        tag: None,
        recorded_at: Utc::now(),
    })
    .await
    .unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_tracking_scrapes")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
