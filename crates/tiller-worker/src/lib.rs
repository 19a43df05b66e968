// Tiller execution substrate
//
// This crate runs workflows: the task runner (layer loop, per-task retry and
// timeout, idempotent replay, status broadcast), the lifecycle controller
// (pause/resume/cancel), the cron scheduler, the versioning engine, dynamic
// map/reduce task groups, variable/secret interpolation, and metric
// recording via the `metrics` facade.
//
// Everything is constructed at startup and passed explicitly: the runner
// takes its repository, event sink, action registry, and cipher as
// parameters, and background loops (scheduler, idempotency sweeper) shut
// down cooperatively over watch channels.

pub mod config;
pub mod controller;
pub mod dynamic;
pub mod idempotency;
pub mod metrics;
pub mod runner;
pub mod scheduler;
pub mod variables;
pub mod versioning;

pub use config::WorkerConfig;
pub use controller::WorkflowController;
pub use dynamic::DynamicTaskService;
pub use idempotency::{derive_key, IdempotencyOutcome, IdempotencyService, IdempotencySweeper};
pub use runner::TaskRunner;
pub use scheduler::Scheduler;
pub use variables::{redact_secrets, redact_secrets_text, VariableService, REDACTED};
pub use versioning::{SnapshotOptions, VersioningService};
