use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use harvest_core::error::{AppError, TransportableError};
use harvest_core::job::{Batch, Job, JobState, StateUpdate, Transition};
use harvest_core::job_queue::JobQueue;

/// PostgreSQL-backed job queue using `SELECT FOR UPDATE SKIP LOCKED`.
///
/// Every state change is a single conditional `UPDATE`, so concurrent
/// workers, cancellers and timeouts race on the row and exactly one wins.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: Pool<Postgres>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, kind, priority, payload, team_id, zero_data_retention, batch_id, \
     admitted, state, created_at, started_at, finished_at, worker_id, result, error";

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    priority: i32,
    payload: serde_json::Value,
    team_id: String,
    zero_data_retention: bool,
    batch_id: Option<Uuid>,
    admitted: bool,
    state: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
}

impl TryFrom<JobRow> for Job {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let error = row
            .error
            .map(serde_json::from_value::<TransportableError>)
            .transpose()?;
        Ok(Job {
            id: row.id,
            kind: row.kind.parse().map_err(AppError::DatabaseError)?,
            priority: row.priority,
            payload: row.payload,
            team_id: row.team_id,
            zero_data_retention: row.zero_data_retention,
            batch_id: row.batch_id,
            admitted: row.admitted,
            state: parse_state(&row.state)?,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            worker_id: row.worker_id,
            result: row.result,
            error,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    kind: String,
    team_id: String,
    zero_data_retention: bool,
    job_ids: Vec<Uuid>,
    cancelled: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = AppError;

    fn try_from(row: BatchRow) -> Result<Self, Self::Error> {
        Ok(Batch {
            id: row.id,
            kind: row.kind.parse().map_err(AppError::DatabaseError)?,
            team_id: row.team_id,
            zero_data_retention: row.zero_data_retention,
            job_ids: row.job_ids,
            cancelled: row.cancelled,
            created_at: row.created_at,
        })
    }
}

fn parse_state(raw: &str) -> Result<JobState, AppError> {
    raw.parse().map_err(AppError::DatabaseError)
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Map a unique-key violation to a validation error naming the duplicate.
fn insert_error(e: sqlx::Error, what: &str, id: Uuid) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Validation(format!("{what} {id} already exists"))
        }
        _ => db_error(e),
    }
}

impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        let error = job.error.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, priority, payload, team_id, zero_data_retention,
                              batch_id, admitted, state, created_at, result, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.kind.as_str())
        .bind(job.priority)
        .bind(&job.payload)
        .bind(&job.team_id)
        .bind(job.zero_data_retention)
        .bind(job.batch_id)
        .bind(job.admitted)
        .bind(job.state.as_str())
        .bind(job.created_at)
        .bind(&job.result)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "Job", job.id))?;

        Ok(())
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = 'active', worker_id = $1, started_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE state = 'queued'
                ORDER BY priority ASC, seq ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Job::try_from).transpose()
    }

    async fn transition(&self, job_id: Uuid, update: StateUpdate) -> Result<Transition, AppError> {
        let target = update.target();
        let sources: Vec<String> = update
            .sources()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let (worker_id, result, error) = match update {
            StateUpdate::Activate { worker_id } => (Some(worker_id), None, None),
            StateUpdate::Complete { result } => (None, Some(result), None),
            StateUpdate::Fail { error } => (None, None, Some(serde_json::to_value(&error)?)),
            StateUpdate::Cancel => (None, None, None),
        };

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET state = $3,
                worker_id = COALESCE($4, worker_id),
                result = COALESCE($5, result),
                error = COALESCE($6, error),
                started_at = CASE WHEN $3::text = 'active' THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $3::text IN ('completed', 'failed', 'cancelled')
                                   THEN NOW() ELSE finished_at END
            WHERE id = $1 AND state = ANY($2)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(&sources)
        .bind(target.as_str())
        .bind(worker_id)
        .bind(result)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = row {
            return Ok(Transition::Applied(row.try_into()?));
        }

        // Lost the race or never eligible: report what the row holds now.
        match self.peek_state(job_id).await? {
            Some(current) => Ok(Transition::Rejected { current }),
            None => Err(AppError::NotFound(format!("Job {job_id} not found"))),
        }
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Job::try_from).transpose()
    }

    async fn peek_state(&self, job_id: Uuid) -> Result<Option<JobState>, AppError> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        state.as_deref().map(parse_state).transpose()
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_batch(&self, batch: &Batch) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO batches (id, kind, team_id, zero_data_retention, job_ids, cancelled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(batch.id)
        .bind(batch.kind.as_str())
        .bind(&batch.team_id)
        .bind(batch.zero_data_retention)
        .bind(&batch.job_ids)
        .bind(batch.cancelled)
        .bind(batch.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "Batch", batch.id))?;

        Ok(())
    }

    async fn remove_batch(&self, batch_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM batches WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_batch(&self, batch_id: Uuid) -> Result<Option<Batch>, AppError> {
        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, kind, team_id, zero_data_retention, job_ids, cancelled, created_at
            FROM batches WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Batch::try_from).transpose()
    }

    async fn mark_batch_cancelled(&self, batch_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE batches SET cancelled = TRUE WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Batch {batch_id} not found")));
        }
        Ok(())
    }

    async fn admitted_load(&self, team_id: &str) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE team_id = $1 AND admitted AND state IN ('queued', 'active')
            "#,
        )
        .bind(team_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count.max(0) as u64)
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = $1")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(count)
    }
}
