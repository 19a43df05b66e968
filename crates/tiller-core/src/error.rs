// Error types for the workflow engine

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while validating, scheduling, or executing workflows
#[derive(Debug, Error)]
pub enum EngineError {
    /// A task depends on a sibling that does not exist
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("circular dependency detected in workflow")]
    DependencyCycle,

    /// Two tasks in one workflow share a name
    #[error("duplicate task name '{0}' in workflow")]
    DuplicateTask(String),

    /// Entity lookup failed
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The requested lifecycle operation does not apply to the current status
    #[error("cannot {op} workflow in '{from}' state")]
    InvalidTransition { from: String, op: &'static str },

    /// A task attempt exceeded its wall-clock limit
    #[error("task '{task}' timed out after {seconds}s")]
    Timeout { task: String, seconds: u64 },

    /// A task exhausted its retry budget
    #[error("task '{task}' failed: {message}")]
    TaskFailed { task: String, message: String },

    /// Secret encryption or decryption failed
    #[error("encryption error: {0}")]
    EncryptionFailure(String),

    /// Persistence operation failed
    #[error("repository error: {0}")]
    Repository(String),

    /// A logical execution with the same idempotency key is already in flight
    #[error("execution already in progress for idempotency key '{0}'")]
    IdempotencyConflict(String),

    /// Cron expression could not be parsed
    #[error("invalid cron expression '{0}'")]
    InvalidCron(String),

    /// Template parameter validation or instantiation failed
    #[error("template error: {0}")]
    Template(String),

    /// Execution was cancelled cooperatively
    #[error("execution cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Create a not-found error for an entity addressed by UUID
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        EngineError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create a repository error
    pub fn repository(msg: impl Into<String>) -> Self {
        EngineError::Repository(msg.into())
    }

    /// Create an encryption error
    pub fn encryption(msg: impl Into<String>) -> Self {
        EngineError::EncryptionFailure(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        EngineError::Template(msg.into())
    }

    /// Create a task failure error
    pub fn task_failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::TaskFailed {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for transports and logs
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownDependency { .. } => "unknown_dependency",
            EngineError::DependencyCycle => "dependency_cycle",
            EngineError::DuplicateTask(_) => "duplicate_task",
            EngineError::NotFound { .. } => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Timeout { .. } => "timeout",
            EngineError::TaskFailed { .. } => "task_failed",
            EngineError::EncryptionFailure(_) => "encryption_failure",
            EngineError::Repository(_) => "repository_failure",
            EngineError::IdempotencyConflict(_) => "idempotency_conflict",
            EngineError::InvalidCron(_) => "invalid_cron",
            EngineError::Template(_) => "template_error",
            EngineError::Cancelled => "cancelled",
            EngineError::Internal(_) => "internal",
        }
    }

    /// True for failures the retry loop may try again (timeouts and task
    /// runtime errors); cancellation and validation errors are not retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. }
                | EngineError::TaskFailed { .. }
                | EngineError::Internal(_)
        )
    }
}
