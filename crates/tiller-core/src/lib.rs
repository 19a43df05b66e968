// Workflow Engine Core
//
// This crate provides the DB-agnostic core of the Tiller workflow engine:
// the domain model, DAG validation with layered topological sort, retry
// policies, status events, placeholder interpolation, workflow templates,
// and the traits backends implement.
//
// Key design decisions:
// - Uses traits (Repository, EventSink, ActionHandler) for pluggable backends
// - The workflow <-> task relationship is ids and lookups, never object cycles
// - Canonical JSON (sorted keys) + SHA-256 underpins versioning and idempotency
// - The action registry is an explicit parameter with a permissive fallback,
//   never a process-wide global

pub mod actions;
pub mod bus;
pub mod canonical;
pub mod dag;
pub mod error;
pub mod events;
pub mod interpolate;
pub mod model;
pub mod retry;
pub mod template;
pub mod traits;

// Re-exports for convenience
pub use actions::{ActionHandler, ActionRegistry, ActionRegistryBuilder, EchoAction, SleepAction};
pub use bus::{EventBus, InMemoryEventSink, NoOpEventSink};
pub use error::{EngineError, Result};
pub use events::StatusEvent;
pub use model::{
    ChangeType, DynamicTaskGroup, GlobalSecret, GlobalVariable, IdempotencyRecord,
    IdempotencyStatus, Task, TaskDefinition, TaskExecution, TaskGroupKind, TaskGroupStatus,
    TaskStatus, Workflow, WorkflowChangeLog, WorkflowDefinition, WorkflowExecution,
    WorkflowSchedule, WorkflowSecret, WorkflowStatus, WorkflowVariable, WorkflowVersion,
};
pub use retry::RetryPolicy;
pub use template::{
    ParameterDefinition, ParameterType, ParameterValidation, WorkflowTemplate,
};
pub use traits::{EventSink, Repository};
