// Workflow versioning: snapshot, checksum, diff, rollback
//
// Snapshots embed the full canonical definition. Creating a snapshot whose
// checksum equals the latest stored version is a no-op that returns the
// existing version. Activating a non-draft deactivates the prior active, so
// at most one version per workflow is ever active. Rollback restores the
// complete definition, tasks included.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use tiller_core::canonical;
use tiller_core::error::{EngineError, Result};
use tiller_core::model::{
    ChangeType, Workflow, WorkflowChangeLog, WorkflowDefinition, WorkflowVersion,
};
use tiller_core::traits::Repository;

/// Options for creating a snapshot
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub change_summary: Option<String>,
    pub changed_by: Option<String>,
    pub version_tag: Option<String>,
    pub is_draft: bool,
}

/// Service for workflow version control
#[derive(Clone)]
pub struct VersioningService<R> {
    repo: R,
}

impl<R: Repository + Clone> VersioningService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Snapshot the current definition of a workflow.
    ///
    /// Idempotent: an unchanged definition returns the latest version
    /// without creating a new row or touching the change log.
    pub async fn create_version(
        &self,
        workflow_id: Uuid,
        options: SnapshotOptions,
    ) -> Result<WorkflowVersion> {
        let (workflow, tasks) = self
            .repo
            .get_workflow_with_tasks(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        let definition = WorkflowDefinition::from_parts(&workflow, &tasks);
        let definition_value = definition.to_value();
        let checksum = canonical::checksum(&definition_value);

        let latest = self.repo.latest_version(workflow_id).await?;
        if let Some(latest) = &latest {
            if latest.checksum == checksum {
                info!(workflow_id = %workflow_id, "definition unchanged, skipping version creation");
                return Ok(latest.clone());
            }
        }

        let version_number = latest.as_ref().map(|v| v.version_number + 1).unwrap_or(1);

        if !options.is_draft {
            if let Some(mut active) = self.repo.active_version(workflow_id).await? {
                active.is_active = false;
                self.repo.update_version(&active).await?;
            }
        }

        let now = Utc::now();
        let version = self
            .repo
            .insert_version(WorkflowVersion {
                id: Uuid::now_v7(),
                workflow_id,
                version_number,
                version_tag: options.version_tag,
                definition,
                checksum,
                is_active: !options.is_draft,
                is_draft: options.is_draft,
                changed_by: options.changed_by.clone(),
                change_summary: options.change_summary.clone(),
                created_at: now,
                activated_at: (!options.is_draft).then_some(now),
            })
            .await?;

        let old_definition = latest.as_ref().map(|v| v.definition.to_value());
        let changes = canonical::diff(old_definition.as_ref(), &definition_value);
        self.repo
            .append_change_log(WorkflowChangeLog {
                id: Uuid::now_v7(),
                workflow_id,
                from_version: latest.as_ref().map(|v| v.version_number),
                to_version: version_number,
                change_type: if latest.is_none() {
                    ChangeType::Created
                } else {
                    ChangeType::Updated
                },
                changes,
                changed_by: options.changed_by,
                change_reason: options.change_summary,
                created_at: now,
            })
            .await?;

        info!(
            workflow_id = %workflow_id,
            version = version_number,
            draft = options.is_draft,
            "created workflow version"
        );
        Ok(version)
    }

    pub async fn get_version(
        &self,
        workflow_id: Uuid,
        version_number: i64,
    ) -> Result<Option<WorkflowVersion>> {
        self.repo.get_version(workflow_id, version_number).await
    }

    pub async fn active_version(&self, workflow_id: Uuid) -> Result<Option<WorkflowVersion>> {
        self.repo.active_version(workflow_id).await
    }

    pub async fn list_versions(
        &self,
        workflow_id: Uuid,
        include_drafts: bool,
        limit: usize,
    ) -> Result<Vec<WorkflowVersion>> {
        self.repo
            .list_versions(workflow_id, include_drafts, limit)
            .await
    }

    /// Roll a workflow back to a stored version.
    ///
    /// Restores the full canonical definition - name, description, and the
    /// task list (restored tasks come back pending with counters reset) -
    /// then snapshots the restored state and appends a `rolled_back` entry.
    pub async fn rollback(
        &self,
        workflow_id: Uuid,
        version_number: i64,
        changed_by: Option<String>,
    ) -> Result<(Workflow, WorkflowVersion)> {
        let target = self
            .repo
            .get_version(workflow_id, version_number)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "version",
                id: format!("{workflow_id}/{version_number}"),
            })?;

        let mut workflow = self
            .repo
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        workflow.name = target.definition.name.clone();
        workflow.description = target.definition.description.clone();
        workflow.updated_at = Utc::now();
        self.repo.update_workflow(&workflow).await?;

        let tasks = target
            .definition
            .tasks
            .iter()
            .map(|definition| definition.into_task(workflow_id))
            .collect();
        self.repo.replace_tasks(workflow_id, tasks).await?;

        let version = self
            .create_version(
                workflow_id,
                SnapshotOptions {
                    change_summary: Some(format!("Rolled back to version {version_number}")),
                    changed_by: changed_by.clone(),
                    ..Default::default()
                },
            )
            .await?;

        self.repo
            .append_change_log(WorkflowChangeLog {
                id: Uuid::now_v7(),
                workflow_id,
                from_version: (version.version_number > 1).then(|| version.version_number - 1),
                to_version: version.version_number,
                change_type: ChangeType::RolledBack,
                changes: json!({ "rolled_back_to": version_number }),
                changed_by,
                change_reason: Some(format!("Rolled back to version {version_number}")),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            workflow_id = %workflow_id,
            target = version_number,
            new_version = version.version_number,
            "rolled back workflow"
        );
        Ok((workflow, version))
    }

    /// Structural diff between two stored versions
    pub async fn compare_versions(
        &self,
        workflow_id: Uuid,
        version_a: i64,
        version_b: i64,
    ) -> Result<Value> {
        let a = self
            .repo
            .get_version(workflow_id, version_a)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "version",
                id: format!("{workflow_id}/{version_a}"),
            })?;
        let b = self
            .repo
            .get_version(workflow_id, version_b)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "version",
                id: format!("{workflow_id}/{version_b}"),
            })?;

        Ok(canonical::diff(
            Some(&a.definition.to_value()),
            &b.definition.to_value(),
        ))
    }

    /// Change log entries, newest first
    pub async fn change_log(
        &self,
        workflow_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkflowChangeLog>> {
        self.repo.list_change_log(workflow_id, limit).await
    }
}
