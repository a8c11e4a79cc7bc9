use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use harvest_client::HttpContentStore;
use harvest_core::error::{ErrorCode, TransportableError};
use harvest_core::{
    AppError, AuditConfig, AuditLogger, CoreConfig, Job, JobExecutor, Orchestrator,
    TracingWorkerReporter, WaitConfig, WorkerConfig, WorkerService,
};
use harvest_db::Database;
use harvest_server::routes;
use harvest_server::state::AppState;

pub const TEAM: &str = "team-test";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub pool: PgPool,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up a PostgreSQL container and return the app wired to it.
pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "harvest_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/harvest_test");
    let pool = retry_connect(&url).await;

    let db = Database::from_pool(pool.clone());
    db.migrate().await.expect("Failed to run migrations");

    let config = CoreConfig {
        wait: WaitConfig {
            poll_initial: Duration::from_millis(20),
            poll_max: Duration::from_millis(100),
            max_wait: None,
        },
        ..CoreConfig::default()
    };
    let audit = AuditLogger::new(
        Some(db.audit_repo()),
        None::<HttpContentStore>,
        AuditConfig::default(),
    );
    let orchestrator = Orchestrator::new(db.job_queue(), audit, config);
    let state = Arc::new(AppState { db, orchestrator });

    TestApp {
        router: routes::router(state.clone()),
        state,
        pool,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(10).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

/// Executor standing in for the fetch engines: echoes the URL as markdown,
/// and fails any URL containing `fail`.
#[derive(Clone)]
pub struct EchoExecutor;

impl JobExecutor for EchoExecutor {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, AppError> {
        let url = job.payload["url"].as_str().unwrap_or_default();
        if url.contains("fail") {
            return Err(TransportableError::new(
                ErrorCode::ScrapeActionError,
                "Action 1 failed: element not found",
            )
            .into());
        }
        Ok(serde_json::json!({
            "markdown": format!("# {url}"),
            "metadata": {"sourceURL": url, "statusCode": 200}
        }))
    }
}

/// Run a worker against the app's queue until the token is cancelled.
pub fn spawn_worker(app: &TestApp) -> CancellationToken {
    let token = CancellationToken::new();
    let worker = WorkerService::new(
        app.state.orchestrator.lifecycle().clone(),
        EchoExecutor,
        WorkerConfig::default()
            .with_worker_id("test-worker")
            .with_poll_interval(Duration::from_millis(20)),
    );
    let run_token = token.clone();
    tokio::spawn(async move {
        let reporter = TracingWorkerReporter;
        worker.run(run_token, &reporter).await
    });
    token
}

/// Send a request as [`TEAM`] and decode the JSON response.
pub async fn send(
    app: &TestApp,
    method: &str,
    path: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header("x-team-id", TEAM);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}
