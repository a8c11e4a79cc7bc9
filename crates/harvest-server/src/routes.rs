use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use harvest_core::job_queue::JobQueue;
use harvest_core::{AppError, BatchCall, CancelOutcome, JobState, ScrapeCall};

use crate::dto::{
    BatchScrapeResponse, BatchStatusResponse, CancelResponse, ConflictResponse, HealthResponse,
    JobResponse, ScrapeResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::team::TeamContext;

/// Build the full router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/scrape", post(scrape))
        .route("/v1/batch/scrape", post(batch_scrape))
        .route(
            "/v1/batch/scrape/{id}",
            get(batch_scrape_status).delete(cancel_batch_scrape),
        )
        .route("/v1/jobs/{id}", get(get_job));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
fn json_body(
    body: Result<axum::Json<serde_json::Value>, JsonRejection>,
) -> Result<serde_json::Value, AppError> {
    body.map(|axum::Json(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/scrape",
    request_body(
        content = Object,
        description = "Scrape options: `url` plus `formats`, `timeout` (ms), `actions`, `proxy`, `zeroDataRetention`"
    ),
    params(
        ("x-team-id" = String, Header, description = "Team the request is billed to"),
        ("x-team-tier" = Option<String>, Header, description = "free, hobby, standard, growth or scale"),
    ),
    responses(
        (status = 200, description = "Scraped document", body = ScrapeResponse),
        (status = 400, description = "Invalid options", body = crate::dto::ErrorResponse),
        (status = 408, description = "Timed out", body = crate::dto::FailureResponse),
        (status = 500, description = "Scrape failed", body = crate::dto::FailureResponse),
    ),
    tag = "scrape"
)]
pub async fn scrape(
    State(state): State<Arc<AppState>>,
    team: TeamContext,
    body: Result<axum::Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = json_body(body)?;
    let output = state
        .orchestrator
        .scrape(ScrapeCall {
            team_id: team.team_id,
            team_tier: team.tier,
            payload,
            preview_token: team.preview_token,
        })
        .await?;

    Ok(axum::Json(ScrapeResponse {
        success: true,
        data: output.document,
        credits_used: output.credits,
    }))
}

// ---------------------------------------------------------------------------
// Batch scrape
// ---------------------------------------------------------------------------

/// Split `{urls: [...], ...options}` into the URL list and the shared options.
fn split_batch_body(
    body: serde_json::Value,
) -> Result<(Vec<String>, serde_json::Value), AppError> {
    let serde_json::Value::Object(mut options) = body else {
        return Err(AppError::Validation("Request body must be an object".into()));
    };
    let urls = match options.remove("urls") {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(url) => Ok(url),
                other => Err(AppError::Validation(format!("urls must be strings, got {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(AppError::Validation("urls must be an array".into())),
        None => return Err(AppError::Validation("urls is required".into())),
    };
    Ok((urls, serde_json::Value::Object(options)))
}

#[utoipa::path(
    post,
    path = "/v1/batch/scrape",
    request_body(
        content = Object,
        description = "`urls` plus scrape options shared by every URL"
    ),
    params(
        ("x-team-id" = String, Header, description = "Team the batch is billed to"),
    ),
    responses(
        (status = 200, description = "Batch submitted", body = BatchScrapeResponse),
        (status = 400, description = "Invalid request", body = crate::dto::ErrorResponse),
    ),
    tag = "batch"
)]
pub async fn batch_scrape(
    State(state): State<Arc<AppState>>,
    team: TeamContext,
    body: Result<axum::Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let (urls, options) = split_batch_body(json_body(body)?)?;
    let batch = state
        .orchestrator
        .batch_scrape(BatchCall {
            team_id: team.team_id,
            team_tier: team.tier,
            urls,
            options,
            preview_token: team.preview_token,
        })
        .await?;

    Ok(axum::Json(BatchScrapeResponse {
        success: true,
        id: batch.id,
        url: format!("/v1/batch/scrape/{}", batch.id),
    }))
}

#[utoipa::path(
    get,
    path = "/v1/batch/scrape/{id}",
    params(
        ("id" = Uuid, Path, description = "Batch ID"),
        ("x-team-id" = String, Header, description = "Team that owns the batch"),
    ),
    responses(
        (status = 200, description = "Batch progress", body = BatchStatusResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "batch"
)]
pub async fn batch_scrape_status(
    State(state): State<Arc<AppState>>,
    team: TeamContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = state.orchestrator.batch_status(id, &team.team_id).await?;
    Ok(axum::Json(BatchStatusResponse::from(progress)))
}

#[utoipa::path(
    delete,
    path = "/v1/batch/scrape/{id}",
    params(
        ("id" = Uuid, Path, description = "Batch ID"),
        ("x-team-id" = String, Header, description = "Team that owns the batch"),
    ),
    responses(
        (status = 200, description = "Unfinished jobs cancelled", body = CancelResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
        (status = 409, description = "Every job already finished", body = ConflictResponse),
    ),
    tag = "batch"
)]
pub async fn cancel_batch_scrape(
    State(state): State<Arc<AppState>>,
    team: TeamContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.cancel_batch(id, &team.team_id).await? {
        CancelOutcome::AlreadyCompleted => Err(AppError::Conflict(
            "Cannot cancel job that has already completed".to_string(),
        )
        .into()),
        CancelOutcome::Cancelled { count } => {
            tracing::info!(batch_id = %id, count, "Batch scrape cancelled");
            Ok(axum::Json(CancelResponse {
                success: true,
                message: "Batch scrape job successfully cancelled.".to_string(),
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ("x-team-id" = String, Header, description = "Team that owns the job"),
    ),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Not found", body = crate::dto::ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    team: TeamContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.job_status(id, &team.team_id).await?;
    Ok(axum::Json(JobResponse::from(job)))
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let queue = state.db.job_queue();
    let counts = async {
        let queued = queue.count_by_state(JobState::Queued).await?;
        let active = queue.count_by_state(JobState::Active).await?;
        Ok::<_, AppError>((queued, active))
    }
    .await;

    match counts {
        Ok((queued, active)) => (
            StatusCode::OK,
            axum::Json(HealthResponse {
                status: "healthy",
                database: "ok",
                queued: Some(queued),
                active: Some(active),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(HealthResponse {
                    status: "unhealthy",
                    database: "error",
                    queued: None,
                    active: None,
                }),
            )
        }
    }
}
