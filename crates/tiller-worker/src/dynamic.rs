// Dynamic task groups: map/reduce fan-out over input arrays
//
// A map group interpolates its task template once per item with context
// `{item, index}` and runs every generated task concurrently. Per-item
// failures become `{"error": ...}` entries in the result sequence and count
// toward `failed`; the group completes only when nothing failed. A reduce
// group runs a single reducer over an input sequence under the same
// abstraction with `total = 1`.

use std::future::Future;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use tiller_core::error::{EngineError, Result};
use tiller_core::interpolate;
use tiller_core::model::{DynamicTaskGroup, TaskGroupKind, TaskGroupStatus};
use tiller_core::traits::Repository;

/// Service for dynamic task group lifecycle and execution
#[derive(Clone)]
pub struct DynamicTaskService<R> {
    repo: R,
}

impl<R: Repository + Clone> DynamicTaskService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Create a map group with `total = items.len()`
    pub async fn create_map_group(
        &self,
        workflow_id: Uuid,
        parent_task_name: impl Into<String>,
        items: Vec<Value>,
        task_template: Value,
    ) -> Result<DynamicTaskGroup> {
        let group = DynamicTaskGroup::new_map(workflow_id, parent_task_name, items, task_template);
        let group = self.repo.insert_task_group(group).await?;
        info!(
            group_id = %group.id,
            parent = %group.parent_task_name,
            items = group.total,
            "created map task group"
        );
        Ok(group)
    }

    /// Execute every item of a map group in parallel.
    ///
    /// `executor` receives the interpolated task config per item; its errors
    /// (and template interpolation errors) are captured per item rather than
    /// aborting the group.
    pub async fn execute_map<F, Fut>(&self, group_id: Uuid, executor: F) -> Result<Vec<Value>>
    where
        F: Fn(Value) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut group = self.load(group_id).await?;
        if group.kind != TaskGroupKind::Map {
            return Err(EngineError::task_failed(
                group.parent_task_name,
                "not a map group",
            ));
        }

        group.status = TaskGroupStatus::Running;
        self.repo.update_task_group(&group).await?;

        let runs = group.items.iter().enumerate().map(|(index, item)| {
            let executor = &executor;
            let template = &group.task_template;
            async move {
                let context = json!({ "item": item, "index": index });
                let config = interpolate::render_template(template, &context)?;
                executor(config).await
            }
        });
        let outcomes = join_all(runs).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut completed = 0usize;
        let mut failed = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(value) => {
                    completed += 1;
                    results.push(value);
                }
                Err(err) => {
                    failed += 1;
                    results.push(json!({ "error": err.to_string() }));
                }
            }
        }

        group.completed = completed;
        group.failed = failed;
        group.results = results.clone();
        group.status = if failed == 0 {
            TaskGroupStatus::Completed
        } else {
            TaskGroupStatus::Failed
        };
        group.completed_at = Some(Utc::now());
        self.repo.update_task_group(&group).await?;

        info!(
            group_id = %group_id,
            completed,
            failed,
            total = group.total,
            "map task group finished"
        );
        Ok(results)
    }

    /// Create a reduce group over an input sequence (typically map output)
    pub async fn create_reduce_group(
        &self,
        workflow_id: Uuid,
        parent_task_name: impl Into<String>,
        items: Vec<Value>,
        reduce_template: Value,
    ) -> Result<DynamicTaskGroup> {
        let group =
            DynamicTaskGroup::new_reduce(workflow_id, parent_task_name, items, reduce_template);
        let group = self.repo.insert_task_group(group).await?;
        info!(group_id = %group.id, parent = %group.parent_task_name, "created reduce task group");
        Ok(group)
    }

    /// Run the reducer over the group's items.
    ///
    /// A reducer failure is captured the same way map captures per-item
    /// failures: it becomes an `{"error": ...}` result entry, counts toward
    /// `failed`, and is returned as the reduce value. The call itself only
    /// errors on group lookup or persistence problems.
    pub async fn execute_reduce<F, Fut>(&self, group_id: Uuid, reducer: F) -> Result<Value>
    where
        F: FnOnce(Vec<Value>, Value) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut group = self.load(group_id).await?;
        if group.kind != TaskGroupKind::Reduce {
            return Err(EngineError::task_failed(
                group.parent_task_name,
                "not a reduce group",
            ));
        }

        group.status = TaskGroupStatus::Running;
        self.repo.update_task_group(&group).await?;

        let outcome = reducer(group.items.clone(), group.task_template.clone()).await;
        group.completed_at = Some(Utc::now());

        let value = match outcome {
            Ok(value) => {
                group.completed = 1;
                group.status = TaskGroupStatus::Completed;
                value
            }
            Err(err) => {
                error!(group_id = %group_id, error = %err, "reduce task failed");
                group.failed = 1;
                group.status = TaskGroupStatus::Failed;
                json!({ "error": err.to_string() })
            }
        };

        group.results = vec![value.clone()];
        self.repo.update_task_group(&group).await?;
        info!(group_id = %group_id, status = ?group.status, "reduce task group finished");
        Ok(value)
    }

    /// Progress snapshot of a group
    pub async fn group_status(&self, group_id: Uuid) -> Result<Value> {
        let group = self.load(group_id).await?;
        Ok(json!({
            "id": group.id,
            "workflow_id": group.workflow_id,
            "kind": group.kind,
            "status": group.status,
            "total": group.total,
            "completed": group.completed,
            "failed": group.failed,
            "progress_percentage": group.progress_percentage(),
            "created_at": group.created_at,
            "completed_at": group.completed_at,
        }))
    }

    async fn load(&self, group_id: Uuid) -> Result<DynamicTaskGroup> {
        self.repo
            .get_task_group(group_id)
            .await?
            .ok_or_else(|| EngineError::not_found("task group", group_id))
    }
}
