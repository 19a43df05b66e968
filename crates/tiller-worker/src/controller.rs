// Workflow lifecycle control: pause, resume, cancel
//
// A pure state machine over the persisted status. The runner polls status
// between layers, so a pause or cancel takes effect at the next layer
// boundary; a layer already in flight settles first. Terminal statuses
// admit no transitions.

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use tiller_core::error::{EngineError, Result};
use tiller_core::model::{Workflow, WorkflowStatus};
use tiller_core::traits::Repository;

/// Service for manual workflow lifecycle transitions
#[derive(Clone)]
pub struct WorkflowController<R> {
    repo: R,
}

impl<R: Repository + Clone> WorkflowController<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Pause a pending or running workflow; pausing a paused workflow is a
    /// no-op. Records `paused_at`.
    pub async fn pause(&self, workflow_id: Uuid) -> Result<Workflow> {
        let mut workflow = self.load(workflow_id).await?;

        match workflow.status {
            WorkflowStatus::Paused => {
                warn!(workflow_id = %workflow_id, "workflow already paused");
                return Ok(workflow);
            }
            WorkflowStatus::Pending | WorkflowStatus::Running => {}
            other => {
                return Err(EngineError::InvalidTransition {
                    from: other.to_string(),
                    op: "pause",
                })
            }
        }

        workflow.set_status(WorkflowStatus::Paused);
        self.repo.update_workflow(&workflow).await?;
        info!(workflow_id = %workflow_id, "workflow paused");
        Ok(workflow)
    }

    /// Resume a paused workflow back to pending and clear `paused_at`.
    /// The caller re-enqueues it; completed layers are not re-run.
    pub async fn resume(&self, workflow_id: Uuid) -> Result<Workflow> {
        let mut workflow = self.load(workflow_id).await?;

        if workflow.status != WorkflowStatus::Paused {
            return Err(EngineError::InvalidTransition {
                from: workflow.status.to_string(),
                op: "resume",
            });
        }

        workflow.set_status(WorkflowStatus::Pending);
        self.repo.update_workflow(&workflow).await?;
        info!(workflow_id = %workflow_id, "workflow resumed");
        Ok(workflow)
    }

    /// Cancel a non-terminal workflow permanently
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<Workflow> {
        let mut workflow = self.load(workflow_id).await?;

        if workflow.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: workflow.status.to_string(),
                op: "cancel",
            });
        }

        workflow.set_status(WorkflowStatus::Cancelled);
        self.repo.update_workflow(&workflow).await?;
        info!(workflow_id = %workflow_id, "workflow cancelled");
        Ok(workflow)
    }

    /// Detailed status map including which operations currently apply
    pub async fn status_report(&self, workflow_id: Uuid) -> Result<Value> {
        let workflow = self.load(workflow_id).await?;
        Ok(json!({
            "workflow_id": workflow.id,
            "name": workflow.name,
            "status": workflow.status,
            "is_paused": workflow.status == WorkflowStatus::Paused,
            "paused_at": workflow.paused_at,
            "created_at": workflow.created_at,
            "updated_at": workflow.updated_at,
            "can_pause": matches!(
                workflow.status,
                WorkflowStatus::Pending | WorkflowStatus::Running
            ),
            "can_resume": workflow.status == WorkflowStatus::Paused,
            "can_cancel": !workflow.status.is_terminal(),
        }))
    }

    async fn load(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.repo
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_storage::MemoryRepository;

    async fn seeded(status: WorkflowStatus) -> (WorkflowController<MemoryRepository>, Uuid) {
        let repo = MemoryRepository::new();
        let mut workflow = Workflow::new("w", None);
        workflow.set_status(status);
        let id = workflow.id;
        repo.create_workflow(workflow, vec![]).await.unwrap();
        (WorkflowController::new(repo), id)
    }

    #[tokio::test]
    async fn test_pause_from_running_records_paused_at() {
        let (controller, id) = seeded(WorkflowStatus::Running).await;
        let workflow = controller.pause(id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Paused);
        assert!(workflow.paused_at.is_some());
    }

    #[tokio::test]
    async fn test_pause_from_pending_allowed() {
        let (controller, id) = seeded(WorkflowStatus::Pending).await;
        assert_eq!(
            controller.pause(id).await.unwrap().status,
            WorkflowStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_pause_when_paused_is_noop() {
        let (controller, id) = seeded(WorkflowStatus::Paused).await;
        let workflow = controller.pause(id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Paused);
    }

    #[tokio::test]
    async fn test_pause_from_terminal_rejected() {
        for status in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let (controller, id) = seeded(status).await;
            assert!(matches!(
                controller.pause(id).await,
                Err(EngineError::InvalidTransition { op: "pause", .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_resume_only_from_paused() {
        let (controller, id) = seeded(WorkflowStatus::Paused).await;
        let workflow = controller.resume(id).await.unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert!(workflow.paused_at.is_none());

        let (controller, id) = seeded(WorkflowStatus::Running).await;
        assert!(matches!(
            controller.resume(id).await,
            Err(EngineError::InvalidTransition { op: "resume", .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_from_non_terminal() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Paused,
        ] {
            let (controller, id) = seeded(status).await;
            assert_eq!(
                controller.cancel(id).await.unwrap().status,
                WorkflowStatus::Cancelled
            );
        }
    }

    #[tokio::test]
    async fn test_cancel_from_terminal_rejected() {
        let (controller, id) = seeded(WorkflowStatus::Completed).await;
        assert!(matches!(
            controller.cancel(id).await,
            Err(EngineError::InvalidTransition { op: "cancel", .. })
        ));
        // A cancelled workflow never leaves the terminal state
        let (controller, id) = seeded(WorkflowStatus::Cancelled).await;
        assert!(controller.resume(id).await.is_err());
        assert!(controller.cancel(id).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_workflow_not_found() {
        let controller = WorkflowController::new(MemoryRepository::new());
        assert!(matches!(
            controller.pause(Uuid::now_v7()).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_report_capabilities() {
        let (controller, id) = seeded(WorkflowStatus::Paused).await;
        let report = controller.status_report(id).await.unwrap();
        assert_eq!(report["is_paused"], json!(true));
        assert_eq!(report["can_pause"], json!(false));
        assert_eq!(report["can_resume"], json!(true));
        assert_eq!(report["can_cancel"], json!(true));
    }
}
