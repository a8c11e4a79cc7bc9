use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Harvest API",
        version = "0.1.0",
        description = "Scrape job orchestration: synchronous scrapes, batch scrapes and job status."
    ),
    paths(
        crate::routes::scrape,
        crate::routes::batch_scrape,
        crate::routes::batch_scrape_status,
        crate::routes::cancel_batch_scrape,
        crate::routes::get_job,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::ScrapeResponse,
        crate::dto::BatchScrapeResponse,
        crate::dto::BatchStatusResponse,
        crate::dto::CancelResponse,
        crate::dto::JobResponse,
        crate::dto::JobErrorResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
        crate::dto::FailureResponse,
        crate::dto::ConflictResponse,
    )),
    tags(
        (name = "scrape", description = "Synchronous single-page scrapes"),
        (name = "batch", description = "Asynchronous batch scrapes"),
        (name = "jobs", description = "Job status"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
