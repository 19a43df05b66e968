// In-memory Repository implementation
//
// Keeps all data behind one async RwLock, making it the backend for unit
// tests, examples, and quick prototyping, and the behavioral model a
// relational backend must match (cascade on delete, upsert-by-key
// semantics, newest-first history listings).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use tiller_core::error::{EngineError, Result};
use tiller_core::model::{
    DynamicTaskGroup, GlobalSecret, GlobalVariable, IdempotencyRecord, Task, TaskExecution,
    Workflow, WorkflowChangeLog, WorkflowExecution, WorkflowSchedule, WorkflowSecret,
    WorkflowVariable, WorkflowVersion,
};
use tiller_core::traits::Repository;

#[derive(Default)]
struct Store {
    workflows: HashMap<Uuid, Workflow>,
    // Task lists keep creation order; definition snapshots rely on it
    tasks: HashMap<Uuid, Vec<Task>>,
    schedules: HashMap<Uuid, WorkflowSchedule>,
    versions: HashMap<Uuid, Vec<WorkflowVersion>>,
    change_log: HashMap<Uuid, Vec<WorkflowChangeLog>>,
    workflow_variables: HashMap<Uuid, Vec<WorkflowVariable>>,
    workflow_secrets: HashMap<Uuid, Vec<WorkflowSecret>>,
    global_variables: HashMap<String, GlobalVariable>,
    global_secrets: HashMap<String, GlobalSecret>,
    idempotency: HashMap<(Uuid, String, String), IdempotencyRecord>,
    task_groups: HashMap<Uuid, DynamicTaskGroup>,
    workflow_executions: Vec<WorkflowExecution>,
    task_executions: Vec<TaskExecution>,
}

/// In-memory repository; cheap to clone, all clones share state
#[derive(Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<RwLock<Store>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    async fn create_workflow(&self, workflow: Workflow, tasks: Vec<Task>) -> Result<Workflow> {
        let mut store = self.inner.write().await;
        if store.workflows.contains_key(&workflow.id) {
            return Err(EngineError::repository(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        store.tasks.insert(workflow.id, tasks);
        store.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.inner.read().await.workflows.get(&id).cloned())
    }

    async fn get_workflow_with_tasks(&self, id: Uuid) -> Result<Option<(Workflow, Vec<Task>)>> {
        let store = self.inner.read().await;
        Ok(store.workflows.get(&id).map(|workflow| {
            let tasks = store.tasks.get(&id).cloned().unwrap_or_default();
            (workflow.clone(), tasks)
        }))
    }

    async fn list_workflows(&self, offset: usize, limit: usize) -> Result<Vec<Workflow>> {
        let store = self.inner.read().await;
        let mut workflows: Vec<Workflow> = store.workflows.values().cloned().collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows.into_iter().skip(offset).take(limit).collect())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let mut store = self.inner.write().await;
        match store.workflows.get_mut(&workflow.id) {
            Some(existing) => {
                *existing = workflow.clone();
                Ok(())
            }
            None => Err(EngineError::not_found("workflow", workflow.id)),
        }
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool> {
        let mut store = self.inner.write().await;
        if store.workflows.remove(&id).is_none() {
            return Ok(false);
        }
        // Cascade to everything the workflow owns
        store.tasks.remove(&id);
        store.schedules.remove(&id);
        store.versions.remove(&id);
        store.change_log.remove(&id);
        store.workflow_variables.remove(&id);
        store.workflow_secrets.remove(&id);
        store.task_groups.retain(|_, group| group.workflow_id != id);
        store.idempotency.retain(|(wf, _, _), _| *wf != id);
        store.workflow_executions.retain(|e| e.workflow_id != id);
        store.task_executions.retain(|e| e.workflow_id != id);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    async fn list_tasks(&self, workflow_id: Uuid) -> Result<Vec<Task>> {
        let store = self.inner.read().await;
        Ok(store.tasks.get(&workflow_id).cloned().unwrap_or_default())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut store = self.inner.write().await;
        let tasks = store
            .tasks
            .get_mut(&task.workflow_id)
            .ok_or_else(|| EngineError::not_found("workflow", task.workflow_id))?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(EngineError::not_found("task", task.id)),
        }
    }

    async fn replace_tasks(&self, workflow_id: Uuid, tasks: Vec<Task>) -> Result<()> {
        let mut store = self.inner.write().await;
        if !store.workflows.contains_key(&workflow_id) {
            return Err(EngineError::not_found("workflow", workflow_id));
        }
        store.tasks.insert(workflow_id, tasks);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    async fn upsert_schedule(&self, schedule: WorkflowSchedule) -> Result<WorkflowSchedule> {
        let mut store = self.inner.write().await;
        store.schedules.insert(schedule.workflow_id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, workflow_id: Uuid) -> Result<Option<WorkflowSchedule>> {
        Ok(self.inner.read().await.schedules.get(&workflow_id).cloned())
    }

    async fn update_schedule(&self, schedule: &WorkflowSchedule) -> Result<()> {
        let mut store = self.inner.write().await;
        match store.schedules.get_mut(&schedule.workflow_id) {
            Some(existing) => {
                *existing = schedule.clone();
                Ok(())
            }
            None => Err(EngineError::not_found("schedule", schedule.workflow_id)),
        }
    }

    async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowSchedule>> {
        let store = self.inner.read().await;
        Ok(store
            .schedules
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect())
    }

    async fn delete_schedule(&self, workflow_id: Uuid) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .schedules
            .remove(&workflow_id)
            .is_some())
    }

    // ------------------------------------------------------------------
    // Versions and change log
    // ------------------------------------------------------------------

    async fn insert_version(&self, version: WorkflowVersion) -> Result<WorkflowVersion> {
        let mut store = self.inner.write().await;
        store
            .versions
            .entry(version.workflow_id)
            .or_default()
            .push(version.clone());
        Ok(version)
    }

    async fn update_version(&self, version: &WorkflowVersion) -> Result<()> {
        let mut store = self.inner.write().await;
        let versions = store
            .versions
            .get_mut(&version.workflow_id)
            .ok_or_else(|| EngineError::not_found("workflow", version.workflow_id))?;
        match versions.iter_mut().find(|v| v.id == version.id) {
            Some(existing) => {
                *existing = version.clone();
                Ok(())
            }
            None => Err(EngineError::not_found("version", version.id)),
        }
    }

    async fn get_version(
        &self,
        workflow_id: Uuid,
        version_number: i64,
    ) -> Result<Option<WorkflowVersion>> {
        let store = self.inner.read().await;
        Ok(store
            .versions
            .get(&workflow_id)
            .and_then(|versions| versions.iter().find(|v| v.version_number == version_number))
            .cloned())
    }

    async fn latest_version(&self, workflow_id: Uuid) -> Result<Option<WorkflowVersion>> {
        let store = self.inner.read().await;
        Ok(store
            .versions
            .get(&workflow_id)
            .and_then(|versions| versions.iter().max_by_key(|v| v.version_number))
            .cloned())
    }

    async fn active_version(&self, workflow_id: Uuid) -> Result<Option<WorkflowVersion>> {
        let store = self.inner.read().await;
        Ok(store
            .versions
            .get(&workflow_id)
            .and_then(|versions| versions.iter().find(|v| v.is_active))
            .cloned())
    }

    async fn list_versions(
        &self,
        workflow_id: Uuid,
        include_drafts: bool,
        limit: usize,
    ) -> Result<Vec<WorkflowVersion>> {
        let store = self.inner.read().await;
        let mut versions: Vec<WorkflowVersion> = store
            .versions
            .get(&workflow_id)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|v| include_drafts || !v.is_draft)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by_key(|v| std::cmp::Reverse(v.version_number));
        versions.truncate(limit);
        Ok(versions)
    }

    async fn append_change_log(&self, entry: WorkflowChangeLog) -> Result<()> {
        let mut store = self.inner.write().await;
        store
            .change_log
            .entry(entry.workflow_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn list_change_log(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkflowChangeLog>> {
        let store = self.inner.read().await;
        let mut entries: Vec<WorkflowChangeLog> = store
            .change_log
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Variables and secrets
    // ------------------------------------------------------------------

    async fn upsert_workflow_variable(
        &self,
        variable: WorkflowVariable,
    ) -> Result<WorkflowVariable> {
        let mut store = self.inner.write().await;
        let variables = store
            .workflow_variables
            .entry(variable.workflow_id)
            .or_default();
        variables.retain(|v| v.key != variable.key);
        variables.push(variable.clone());
        Ok(variable)
    }

    async fn get_workflow_variable(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<WorkflowVariable>> {
        let store = self.inner.read().await;
        Ok(store
            .workflow_variables
            .get(&workflow_id)
            .and_then(|variables| variables.iter().find(|v| v.key == key))
            .cloned())
    }

    async fn list_workflow_variables(&self, workflow_id: Uuid) -> Result<Vec<WorkflowVariable>> {
        let store = self.inner.read().await;
        Ok(store
            .workflow_variables
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_workflow_variable(&self, workflow_id: Uuid, key: &str) -> Result<bool> {
        let mut store = self.inner.write().await;
        match store.workflow_variables.get_mut(&workflow_id) {
            Some(variables) => {
                let before = variables.len();
                variables.retain(|v| v.key != key);
                Ok(variables.len() < before)
            }
            None => Ok(false),
        }
    }

    async fn upsert_workflow_secret(&self, secret: WorkflowSecret) -> Result<WorkflowSecret> {
        let mut store = self.inner.write().await;
        let secrets = store.workflow_secrets.entry(secret.workflow_id).or_default();
        secrets.retain(|s| s.key != secret.key);
        secrets.push(secret.clone());
        Ok(secret)
    }

    async fn get_workflow_secret(
        &self,
        workflow_id: Uuid,
        key: &str,
    ) -> Result<Option<WorkflowSecret>> {
        let store = self.inner.read().await;
        Ok(store
            .workflow_secrets
            .get(&workflow_id)
            .and_then(|secrets| secrets.iter().find(|s| s.key == key))
            .cloned())
    }

    async fn list_workflow_secrets(&self, workflow_id: Uuid) -> Result<Vec<WorkflowSecret>> {
        let store = self.inner.read().await;
        Ok(store
            .workflow_secrets
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_workflow_secret(&self, workflow_id: Uuid, key: &str) -> Result<bool> {
        let mut store = self.inner.write().await;
        match store.workflow_secrets.get_mut(&workflow_id) {
            Some(secrets) => {
                let before = secrets.len();
                secrets.retain(|s| s.key != key);
                Ok(secrets.len() < before)
            }
            None => Ok(false),
        }
    }

    async fn upsert_global_variable(&self, variable: GlobalVariable) -> Result<GlobalVariable> {
        let mut store = self.inner.write().await;
        store
            .global_variables
            .insert(variable.key.clone(), variable.clone());
        Ok(variable)
    }

    async fn get_global_variable(&self, key: &str) -> Result<Option<GlobalVariable>> {
        Ok(self.inner.read().await.global_variables.get(key).cloned())
    }

    async fn delete_global_variable(&self, key: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .global_variables
            .remove(key)
            .is_some())
    }

    async fn upsert_global_secret(&self, secret: GlobalSecret) -> Result<GlobalSecret> {
        let mut store = self.inner.write().await;
        store
            .global_secrets
            .insert(secret.key.clone(), secret.clone());
        Ok(secret)
    }

    async fn get_global_secret(&self, key: &str) -> Result<Option<GlobalSecret>> {
        Ok(self.inner.read().await.global_secrets.get(key).cloned())
    }

    async fn delete_global_secret(&self, key: &str) -> Result<bool> {
        Ok(self
            .inner
            .write()
            .await
            .global_secrets
            .remove(key)
            .is_some())
    }

    // ------------------------------------------------------------------
    // Idempotency
    // ------------------------------------------------------------------

    async fn get_idempotency(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let store = self.inner.read().await;
        Ok(store
            .idempotency
            .get(&(workflow_id, task_name.to_string(), key.to_string()))
            .cloned())
    }

    async fn upsert_idempotency(&self, record: IdempotencyRecord) -> Result<IdempotencyRecord> {
        let mut store = self.inner.write().await;
        store.idempotency.insert(
            (
                record.workflow_id,
                record.task_name.clone(),
                record.key.clone(),
            ),
            record.clone(),
        );
        Ok(record)
    }

    async fn delete_idempotency(&self, id: Uuid) -> Result<bool> {
        let mut store = self.inner.write().await;
        let before = store.idempotency.len();
        store.idempotency.retain(|_, record| record.id != id);
        Ok(store.idempotency.len() < before)
    }

    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut store = self.inner.write().await;
        let before = store.idempotency.len();
        store.idempotency.retain(|_, record| !record.is_expired(now));
        Ok(before - store.idempotency.len())
    }

    // ------------------------------------------------------------------
    // Dynamic task groups
    // ------------------------------------------------------------------

    async fn insert_task_group(&self, group: DynamicTaskGroup) -> Result<DynamicTaskGroup> {
        let mut store = self.inner.write().await;
        store.task_groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_task_group(&self, id: Uuid) -> Result<Option<DynamicTaskGroup>> {
        Ok(self.inner.read().await.task_groups.get(&id).cloned())
    }

    async fn update_task_group(&self, group: &DynamicTaskGroup) -> Result<()> {
        let mut store = self.inner.write().await;
        match store.task_groups.get_mut(&group.id) {
            Some(existing) => {
                *existing = group.clone();
                Ok(())
            }
            None => Err(EngineError::not_found("task group", group.id)),
        }
    }

    // ------------------------------------------------------------------
    // Execution history
    // ------------------------------------------------------------------

    async fn append_workflow_execution(&self, execution: WorkflowExecution) -> Result<()> {
        self.inner.write().await.workflow_executions.push(execution);
        Ok(())
    }

    async fn append_task_execution(&self, execution: TaskExecution) -> Result<()> {
        self.inner.write().await.task_executions.push(execution);
        Ok(())
    }

    async fn list_workflow_executions(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>> {
        let store = self.inner.read().await;
        let mut executions: Vec<WorkflowExecution> = store
            .workflow_executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.reverse();
        executions.truncate(limit);
        Ok(executions)
    }

    async fn list_task_executions(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TaskExecution>> {
        let store = self.inner.read().await;
        let mut executions: Vec<TaskExecution> = store
            .task_executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.reverse();
        executions.truncate(limit);
        Ok(executions)
    }
}
