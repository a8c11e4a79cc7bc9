pub mod audit;
pub mod billing;
pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod job_queue;
pub mod lifecycle;
pub mod memory_queue;
pub mod models;
pub mod options;
pub mod orchestrator;
pub mod priority;
pub mod traits;
pub mod wait;
pub mod worker;

#[cfg(test)]
pub mod testutil;

pub use audit::{AuditConfig, AuditLogger, LoggedRequest, RequestReceipt};
pub use billing::{BillableOperation, PricingTable, ProxyMode, ScrapeTier, credits_for};
pub use cancel::{CancelOutcome, CancellationCoordinator};
pub use config::CoreConfig;
pub use error::{AppError, ErrorCode, TransportableError};
pub use job::{
    Batch, Job, JobKind, JobOutcome, JobState, NewBatch, NewJob, StateUpdate, SubmitMode,
    Transition, WorkerConfig,
};
pub use job_queue::JobQueue;
pub use lifecycle::{JobLifecycle, JobSignal};
pub use memory_queue::MemoryQueue;
pub use models::{ChangeTrackingEntry, ModelKind, OutcomeRecord, RequestRecord};
pub use options::ScrapeOptions;
pub use orchestrator::{
    BatchCall, BatchProgress, BatchStatus, Orchestrator, ScrapeCall, ScrapeOutput,
};
pub use priority::{TeamTier, job_priority};
pub use traits::{AuditSink, ContentStore, JobExecutor};
pub use wait::{WaitConfig, WaitCoordinator};
pub use worker::{TracingWorkerReporter, WorkerEvent, WorkerReporter, WorkerService};
