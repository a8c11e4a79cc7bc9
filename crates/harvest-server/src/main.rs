use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use harvest_client::{ContentStoreConfig, HttpContentStore};
use harvest_core::{AuditLogger, CoreConfig, Orchestrator};
use harvest_db::{Database, DatabaseConfig};
use harvest_server::routes;
use harvest_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("HARVEST_SERVER_PORT").unwrap_or_else(|_| "3002".to_string());
    let addr = format!("0.0.0.0:{port}");

    let core = CoreConfig::from_env()?;
    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let content = match ContentStoreConfig::from_env()? {
        Some(config) => Some(HttpContentStore::new(&config)?),
        None => {
            tracing::warn!("HARVEST_CONTENT_STORE_URL not set, result payloads will not be stored");
            None
        }
    };
    let audit = AuditLogger::new(Some(db.audit_repo()), content, core.audit.clone());
    let orchestrator = Orchestrator::new(db.job_queue(), audit, core);

    let state = Arc::new(AppState { db, orchestrator });

    let shutdown = CancellationToken::new();
    let reconciler = tokio::spawn(reconcile_batches(state.clone(), shutdown.clone()));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    reconciler.await?;
    Ok(())
}

/// Finalize batches that finished without anyone polling them.
async fn reconcile_batches(state: Arc<AppState>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(state.orchestrator.config().reconcile_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = token.cancelled() => break,
        }
        if let Err(e) = state.orchestrator.reconcile().await {
            tracing::warn!(error = %e, "Batch reconciliation failed");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
