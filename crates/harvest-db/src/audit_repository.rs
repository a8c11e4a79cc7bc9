use sqlx::{PgPool, Pool, Postgres};

use harvest_core::error::AppError;
use harvest_core::models::{ChangeTrackingEntry, OutcomeRecord, RequestRecord};
use harvest_core::traits::AuditSink;

/// Insert-only audit storage: the `requests` table plus one table per
/// operation kind.
#[derive(Clone)]
pub struct AuditRepository {
    pool: Pool<Postgres>,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

impl AuditSink for AuditRepository {
    async fn insert_request(&self, record: &RequestRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO requests (id, kind, api_version, created_at, team_id, origin,
                                  integration, target_hint, dr_clean_by, api_key_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.kind.as_str())
        .bind(&record.api_version)
        .bind(record.created_at)
        .bind(&record.team_id)
        .bind(&record.origin)
        .bind(&record.integration)
        .bind(&record.target_hint)
        .bind(record.dr_clean_by)
        .bind(record.api_key_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        tracing::debug!(request_id = %record.id, kind = %record.kind, "Request logged");
        Ok(())
    }

    async fn insert_outcome(&self, record: &OutcomeRecord) -> Result<(), AppError> {
        let query = match record {
            OutcomeRecord::Scrape(r) => sqlx::query(
                r#"
                INSERT INTO scrapes (id, request_id, url, is_successful, error, time_taken,
                                     team_id, options, cost_tracking, pdf_num_pages, credits_cost)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.url)
            .bind(r.is_successful)
            .bind(&r.error)
            .bind(r.time_taken)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(&r.cost_tracking)
            .bind(r.pdf_num_pages)
            .bind(r.credits_cost),
            OutcomeRecord::Crawl(r) => sqlx::query(
                r#"
                INSERT INTO crawls (id, request_id, url, team_id, options, num_docs,
                                    credits_cost, cancelled)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.url)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.num_docs)
            .bind(r.credits_cost)
            .bind(r.cancelled),
            OutcomeRecord::BatchScrape(r) => sqlx::query(
                r#"
                INSERT INTO batch_scrapes (id, request_id, team_id, num_docs, credits_cost, cancelled)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.team_id)
            .bind(r.num_docs)
            .bind(r.credits_cost)
            .bind(r.cancelled),
            OutcomeRecord::Search(r) => sqlx::query(
                r#"
                INSERT INTO searches (id, request_id, query, team_id, options, time_taken,
                                      credits_cost, is_successful, error, num_results)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.query)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.time_taken)
            .bind(r.credits_cost)
            .bind(r.is_successful)
            .bind(&r.error)
            .bind(r.num_results),
            OutcomeRecord::Extract(r) => sqlx::query(
                r#"
                INSERT INTO extracts (id, request_id, urls, team_id, options, model_kind,
                                      credits_cost, is_successful, error, cost_tracking)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.urls)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.model_kind.as_str())
            .bind(r.credits_cost)
            .bind(r.is_successful)
            .bind(&r.error)
            .bind(&r.cost_tracking),
            OutcomeRecord::Map(r) => sqlx::query(
                r#"
                INSERT INTO maps (id, request_id, url, team_id, options, num_results, credits_cost)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.url)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.num_results)
            .bind(r.credits_cost),
            OutcomeRecord::Llmstxt(r) => sqlx::query(
                r#"
                INSERT INTO llmstxts (id, request_id, url, team_id, options, num_urls,
                                      cost_tracking, credits_cost)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.url)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.num_urls)
            .bind(&r.cost_tracking)
            .bind(r.credits_cost),
            OutcomeRecord::DeepResearch(r) => sqlx::query(
                r#"
                INSERT INTO deep_researches (id, request_id, query, team_id, options, time_taken,
                                             credits_cost, cost_tracking)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(r.id)
            .bind(r.request_id)
            .bind(&r.query)
            .bind(&r.team_id)
            .bind(&r.options)
            .bind(r.time_taken)
            .bind(r.credits_cost)
            .bind(&r.cost_tracking),
        };

        query.execute(&self.pool).await.map_err(db_error)?;

        tracing::debug!(
            id = %record.id(),
            request_id = %record.request_id(),
            kind = %record.kind(),
            credits = record.credits_cost(),
            "Outcome logged"
        );
        Ok(())
    }

    async fn track_change(&self, entry: &ChangeTrackingEntry) -> Result<(), AppError> {
        sqlx::query("SELECT change_tracking_insert_scrape($1, $2, $3, $4, $5)")
            .bind(&entry.team_id)
            .bind(&entry.url)
            .bind(entry.scrape_id)
            .bind(&entry.tag)
            .bind(entry.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(())
    }
}
