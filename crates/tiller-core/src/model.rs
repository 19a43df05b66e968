// Domain entities (shared by storage backends and the worker)
//
// The workflow <-> task relationship is modelled as ids and lookups, never as
// object cycles. All instants are UTC; all enums are wire-encoded snake_case.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

// ============================================================================
// Workflow
// ============================================================================

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-declared DAG of tasks
///
/// Invariant: `paused_at` is non-null iff `status == Paused`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description,
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            paused_at: None,
        }
    }

    /// Set the status and bump `updated_at`, maintaining the paused_at invariant
    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status == WorkflowStatus::Paused {
            self.paused_at = Some(self.updated_at);
        } else {
            self.paused_at = None;
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Lifecycle status of a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a workflow DAG
///
/// `name` is unique within the owning workflow; `dependencies` name siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub action_type: String,
    pub action_payload: Value,
    pub dependencies: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub timeout_seconds: Option<u64>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        workflow_id: Uuid,
        name: impl Into<String>,
        action_type: impl Into<String>,
        action_payload: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            name: name.into(),
            action_type: action_type.into(),
            action_payload,
            dependencies: Vec::new(),
            retry_policy: None,
            timeout_seconds: None,
            status: TaskStatus::Pending,
            result: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set the status and bump `updated_at`
    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Workflow definition (the canonicalized snapshot shape)
// ============================================================================

/// Task fields as embedded in a version snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub action_type: String,
    pub action_payload: Value,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl From<&Task> for TaskDefinition {
    fn from(task: &Task) -> Self {
        Self {
            name: task.name.clone(),
            action_type: task.action_type.clone(),
            action_payload: task.action_payload.clone(),
            dependencies: task.dependencies.clone(),
            retry_policy: task.retry_policy.clone(),
            timeout_seconds: task.timeout_seconds,
        }
    }
}

impl TaskDefinition {
    /// Materialize a fresh pending task for `workflow_id` from this definition
    pub fn into_task(&self, workflow_id: Uuid) -> Task {
        let mut task = Task::new(
            workflow_id,
            self.name.clone(),
            self.action_type.clone(),
            self.action_payload.clone(),
        )
        .with_dependencies(self.dependencies.clone());
        task.retry_policy = self.retry_policy.clone();
        task.timeout_seconds = self.timeout_seconds;
        task
    }
}

/// The full definition a version embeds, a checksum covers, and a rollback
/// restores: name, description, and the ordered task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub tasks: Vec<TaskDefinition>,
}

impl WorkflowDefinition {
    pub fn from_parts(workflow: &Workflow, tasks: &[Task]) -> Self {
        Self {
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            tasks: tasks.iter().map(TaskDefinition::from).collect(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// Versioning
// ============================================================================

/// Immutable snapshot of a workflow definition
///
/// Invariants: `version_number` increases monotonically per workflow; at most
/// one version per workflow has `is_active = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVersion {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub version_number: i64,
    pub version_tag: Option<String>,
    pub definition: WorkflowDefinition,
    pub checksum: String,
    pub is_active: bool,
    pub is_draft: bool,
    pub changed_by: Option<String>,
    pub change_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Kind of structural transition recorded in the change log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    RolledBack,
    Deleted,
}

/// Append-only record of one structural transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowChangeLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub from_version: Option<i64>,
    pub to_version: i64,
    pub change_type: ChangeType,
    pub changes: Value,
    pub changed_by: Option<String>,
    pub change_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Schedules
// ============================================================================

/// Cron-based schedule, at most one per workflow
///
/// Invariant: when enabled, `next_run` is the smallest future instant
/// satisfying the cron expression as of the last recalculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSchedule {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub cron_expression: String,
    pub timezone: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSchedule {
    pub fn new(workflow_id: Uuid, cron_expression: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            cron_expression: cron_expression.into(),
            timezone: "UTC".to_string(),
            enabled: true,
            next_run: None,
            last_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Next instant after `base` satisfying the cron expression
    pub fn next_after(&self, base: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let schedule = parse_cron_expression(&self.cron_expression)?;
        schedule
            .after(&base)
            .next()
            .ok_or_else(|| EngineError::InvalidCron(self.cron_expression.clone()))
    }

    /// Recompute `next_run` from `base` and bump `updated_at`.
    /// Missed firings collapse: the base is the current instant, never the
    /// previously scheduled one.
    pub fn advance(&mut self, base: DateTime<Utc>) -> Result<()> {
        self.next_run = Some(self.next_after(base)?);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.map(|t| t <= now).unwrap_or(true)
    }
}

/// Parse a standard 5-field cron expression.
///
/// The `cron` crate expects a seconds field, so `m h dom mon dow` is
/// normalized to `0 m h dom mon dow`. Expressions that already carry a
/// seconds or year field are rejected to keep stored schedules uniform.
pub fn parse_cron_expression(expression: &str) -> Result<cron::Schedule> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(EngineError::InvalidCron(expression.to_string()));
    }
    let normalized = format!("0 {expression}");
    cron::Schedule::from_str(&normalized)
        .map_err(|_| EngineError::InvalidCron(expression.to_string()))
}

/// Validate a cron expression without building a schedule for it
pub fn validate_cron_expression(expression: &str) -> bool {
    parse_cron_expression(expression).is_ok()
}

// ============================================================================
// Dynamic task groups
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGroupKind {
    Map,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGroupStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Fan-out group generated from an input array and a task template
///
/// Invariant: `completed + failed <= total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicTaskGroup {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub parent_task_name: String,
    pub kind: TaskGroupKind,
    pub items: Vec<Value>,
    pub task_template: Value,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<Value>,
    pub status: TaskGroupStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DynamicTaskGroup {
    pub fn new_map(
        workflow_id: Uuid,
        parent_task_name: impl Into<String>,
        items: Vec<Value>,
        task_template: Value,
    ) -> Self {
        let total = items.len();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            parent_task_name: parent_task_name.into(),
            kind: TaskGroupKind::Map,
            items,
            task_template,
            total,
            completed: 0,
            failed: 0,
            results: Vec::new(),
            status: TaskGroupStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn new_reduce(
        workflow_id: Uuid,
        parent_task_name: impl Into<String>,
        items: Vec<Value>,
        reduce_template: Value,
    ) -> Self {
        Self {
            kind: TaskGroupKind::Reduce,
            total: 1,
            ..Self::new_map(workflow_id, parent_task_name, items, reduce_template)
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.completed + self.failed) as f64 / self.total as f64 * 100.0
    }
}

// ============================================================================
// Idempotency
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

/// Dedup record for one logical execution, identified by
/// `(workflow_id, task_name, key)`
///
/// Expired records are treated as absent; `failed` is retry-eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_name: String,
    pub key: String,
    pub status: IdempotencyStatus,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub request_hash: Option<String>,
    pub execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now > t).unwrap_or(false)
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.expires_at = Some(Utc::now() + ttl);
    }
}

// ============================================================================
// Variables and secrets
// ============================================================================

/// Plaintext key/value pair scoped to one workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Encrypted key/value pair scoped to one workflow; `ciphertext` is base64
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSecret {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub key: String,
    pub ciphertext: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Plaintext key/value pair visible to every workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Encrypted key/value pair visible to every workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSecret {
    pub id: Uuid,
    pub key: String,
    pub ciphertext: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Execution history
// ============================================================================

/// Append-only record of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Append-only record of one task attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub task_name: String,
    pub attempt: u32,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub result: Option<Value>,
}
