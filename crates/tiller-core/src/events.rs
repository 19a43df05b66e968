// Status events published on the event bus
//
// Events are small JSON-serializable maps: one shape for workflow status
// transitions, one for task status transitions. The bus is a view over
// persisted status; the repository stays the source of truth.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::model::{Task, TaskStatus, Workflow, WorkflowStatus};

/// A single status transition, as seen by subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusEvent {
    Workflow {
        workflow_id: Uuid,
        status: WorkflowStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
    Task {
        task_id: Uuid,
        task_name: String,
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

impl StatusEvent {
    pub fn workflow(workflow: &Workflow) -> Self {
        StatusEvent::Workflow {
            workflow_id: workflow.id,
            status: workflow.status,
            error: None,
            result: None,
        }
    }

    pub fn workflow_failed(workflow: &Workflow, error: impl Into<String>) -> Self {
        StatusEvent::Workflow {
            workflow_id: workflow.id,
            status: workflow.status,
            error: Some(error.into()),
            result: None,
        }
    }

    pub fn task(task: &Task) -> Self {
        StatusEvent::Task {
            task_id: task.id,
            task_name: task.name.clone(),
            status: task.status,
            error: None,
            result: None,
        }
    }

    pub fn task_completed(task: &Task, result: Value) -> Self {
        StatusEvent::Task {
            task_id: task.id,
            task_name: task.name.clone(),
            status: task.status,
            error: None,
            result: Some(result),
        }
    }

    pub fn task_failed(task: &Task, error: impl Into<String>) -> Self {
        StatusEvent::Task {
            task_id: task.id,
            task_name: task.name.clone(),
            status: task.status,
            error: Some(error.into()),
            result: None,
        }
    }

    /// JSON map form, as delivered to transports
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// True for workflow-level events
    pub fn is_workflow(&self) -> bool {
        matches!(self, StatusEvent::Workflow { .. })
    }
}
