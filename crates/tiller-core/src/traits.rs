// Core traits for pluggable backends
//
// These traits let the execution substrate run against different backends:
// - In-memory implementations for examples and testing
// - Relational implementations for production
//
// The Repository contract is the full persistence surface the engine needs;
// write paths are transactional in spirit: a failed mutation must leave the
// store unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::events::StatusEvent;
use crate::model::{
    DynamicTaskGroup, GlobalSecret, GlobalVariable, IdempotencyRecord, Task, TaskExecution,
    Workflow, WorkflowChangeLog, WorkflowExecution, WorkflowSchedule, WorkflowSecret,
    WorkflowVariable, WorkflowVersion,
};

// ============================================================================
// EventSink - status fan-out
// ============================================================================

/// Trait for publishing status events during execution
///
/// Implementations can:
/// - Fan events out to live subscribers (websocket bridges, SSE)
/// - Collect events in memory for testing
/// - Do nothing (no-op implementation)
///
/// Delivery is best-effort: a publish must never block on slow or
/// disconnected subscribers, and publish order from one publisher is
/// preserved per subscriber.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish a single event
    async fn publish(&self, event: StatusEvent) -> Result<()>;

    /// Publish multiple events in order
    async fn publish_all(&self, events: Vec<StatusEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Repository - transactional persistence
// ============================================================================

/// Persistence contract for workflows and everything they own.
///
/// Deleting a workflow cascades to its tasks, versions, change log,
/// schedule, variables, secrets, task groups, idempotency records, and
/// execution history.
#[async_trait]
pub trait Repository: Send + Sync {
    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    /// Persist a workflow together with its validated tasks
    async fn create_workflow(&self, workflow: Workflow, tasks: Vec<Task>) -> Result<Workflow>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>>;

    async fn get_workflow_with_tasks(&self, id: Uuid) -> Result<Option<(Workflow, Vec<Task>)>>;

    async fn list_workflows(&self, offset: usize, limit: usize) -> Result<Vec<Workflow>>;

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()>;

    /// Delete a workflow and everything it owns; false when absent
    async fn delete_workflow(&self, id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    async fn list_tasks(&self, workflow_id: Uuid) -> Result<Vec<Task>>;

    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Replace the whole task list of a workflow (rollback restore path)
    async fn replace_tasks(&self, workflow_id: Uuid, tasks: Vec<Task>) -> Result<()>;

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    /// Insert or replace the schedule of a workflow (at most one each)
    async fn upsert_schedule(&self, schedule: WorkflowSchedule) -> Result<WorkflowSchedule>;

    async fn get_schedule(&self, workflow_id: Uuid) -> Result<Option<WorkflowSchedule>>;

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<()>;

    /// Enabled schedules with `next_run <= now` or no `next_run` yet
    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowSchedule>>;

    async fn delete_schedule(&self, workflow_id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Versions and change log
    // ------------------------------------------------------------------

    async fn insert_version(&self, version: WorkflowVersion) -> Result<WorkflowVersion>;

    async fn update_version(&self, version: &WorkflowVersion) -> Result<()>;

    async fn get_version(
        &self,
        workflow_id: Uuid,
        version_number: i64,
    ) -> Result<Option<WorkflowVersion>>;

    async fn latest_version(&self, workflow_id: Uuid) -> Result<Option<WorkflowVersion>>;

    async fn active_version(&self, workflow_id: Uuid) -> Result<Option<WorkflowVersion>>;

    /// Versions ordered by version number descending
    async fn list_versions(
        &self,
        workflow_id: Uuid,
        include_drafts: bool,
        limit: usize,
    ) -> Result<Vec<WorkflowVersion>>;

    async fn append_change_log(&self, entry: WorkflowChangeLog) -> Result<()>;

    /// Change log entries, newest first
    async fn list_change_log(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkflowChangeLog>>;

    // ------------------------------------------------------------------
    // Variables and secrets
    // ------------------------------------------------------------------

    async fn upsert_workflow_variable(
        &self,
        variable: WorkflowVariable,
    ) -> Result<WorkflowVariable>;

    async fn get_workflow_variable(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<WorkflowVariable>>;

    async fn list_workflow_variables(&self, workflow_id: Uuid) -> Result<Vec<WorkflowVariable>>;

    async fn delete_workflow_variable(&self, workflow_id: Uuid, key: &str) -> Result<bool>;

    async fn upsert_workflow_secret(&self, secret: WorkflowSecret) -> Result<WorkflowSecret>;

    async fn get_workflow_secret(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<WorkflowSecret>>;

    async fn list_workflow_secrets(&self, workflow_id: Uuid) -> Result<Vec<WorkflowSecret>>;

    async fn delete_workflow_secret(&self, workflow_id: Uuid, key: &str) -> Result<bool>;

    async fn upsert_global_variable(&self, variable: GlobalVariable) -> Result<GlobalVariable>;

    async fn get_global_variable(&self, key: &str) -> Result<Option<GlobalVariable>>;

    async fn delete_global_variable(&self, key: &str) -> Result<bool>;

    async fn upsert_global_secret(&self, secret: GlobalSecret) -> Result<GlobalSecret>;

    async fn get_global_secret(&self, key: &str) -> Result<Option<GlobalSecret>>;

    async fn delete_global_secret(&self, key: &str) -> Result<bool>;

    // ------------------------------------------------------------------
    // Idempotency
    // ------------------------------------------------------------------

    async fn get_idempotency(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Insert or replace by the `(workflow_id, task_name, key)` triple
    async fn upsert_idempotency(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord>;

    async fn delete_idempotency(&self, id: Uuid) -> Result<bool>;

    /// Delete records whose `expires_at` is before `now`; returns the count
    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<usize>;

    // ------------------------------------------------------------------
    // Dynamic task groups
    // ------------------------------------------------------------------

    async fn insert_task_group(&self, group: DynamicTaskGroup) -> Result<DynamicTaskGroup>;

    async fn get_task_group(&self, id: Uuid) -> Result<Option<DynamicTaskGroup>>;

    async fn update_task_group(&self, group: &DynamicTaskGroup) -> Result<()>;

    // ------------------------------------------------------------------
    // Execution history (append-only)
    // ------------------------------------------------------------------

    async fn append_workflow_execution(&self, execution: WorkflowExecution) -> Result<()>;

    async fn append_task_execution(&self, execution: TaskExecution) -> Result<()>;

    /// Workflow runs, newest first
    async fn list_workflow_executions(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>>;

    /// Task attempts, newest first
    async fn list_task_executions(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskExecution>>;
}
