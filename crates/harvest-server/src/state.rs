use harvest_client::HttpContentStore;
use harvest_core::Orchestrator;
use harvest_db::{AuditRepository, Database, PgJobQueue};

pub type HarvestOrchestrator = Orchestrator<PgJobQueue, AuditRepository, HttpContentStore>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub orchestrator: HarvestOrchestrator,
}
