// Task runner: executes one workflow end-to-end
//
// Layers run strictly in order; tasks inside a layer run concurrently.
// Pause and cancel are observed between layers only - a layer in flight
// always settles, so there is never torn state at a layer boundary. On a
// terminal task failure the rest of the layer finishes, later layers never
// start, and the workflow is marked failed.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use tiller_core::actions::ActionRegistry;
use tiller_core::dag;
use tiller_core::error::{EngineError, Result};
use tiller_core::events::StatusEvent;
use tiller_core::model::{
    Task, TaskExecution, TaskStatus, Workflow, WorkflowExecution, WorkflowStatus,
};
use tiller_core::traits::{EventSink, Repository};
use tiller_storage::SecretCipher;

use crate::config::WorkerConfig;
use crate::idempotency::{derive_key, IdempotencyOutcome, IdempotencyService};
use crate::metrics;
use crate::variables::{redact_secrets, redact_secrets_text, VariableService};

enum LayerOutcome {
    /// All layers ran to completion
    Finished,
    /// A pause or cancel was observed; the persisted status stands
    Interrupted,
}

/// Executes workflows against a repository, publishing status transitions
/// on the event sink. One logical runner serves any number of workflows;
/// collaborators are explicit parameters, never globals.
#[derive(Clone)]
pub struct TaskRunner<R, E> {
    repo: R,
    events: E,
    actions: Arc<ActionRegistry>,
    variables: VariableService<R>,
    idempotency: IdempotencyService<R>,
}

impl<R, E> TaskRunner<R, E>
where
    R: Repository + Clone + Send + Sync + 'static,
    E: EventSink + Clone + Send + Sync + 'static,
{
    pub fn new(repo: R, events: E, actions: ActionRegistry, cipher: SecretCipher) -> Self {
        Self::with_config(repo, events, actions, cipher, &WorkerConfig::default())
    }

    pub fn with_config(
        repo: R,
        events: E,
        actions: ActionRegistry,
        cipher: SecretCipher,
        config: &WorkerConfig,
    ) -> Self {
        let variables = VariableService::new(repo.clone(), cipher);
        let idempotency = IdempotencyService::new(repo.clone(), config.idempotency_ttl);
        Self {
            repo,
            events,
            actions: Arc::new(actions),
            variables,
            idempotency,
        }
    }

    pub fn variables(&self) -> &VariableService<R> {
        &self.variables
    }

    pub fn idempotency(&self) -> &IdempotencyService<R> {
        &self.idempotency
    }

    /// Execute a workflow by running its tasks layer by layer.
    ///
    /// Resuming a previously paused workflow re-enters here: completed tasks
    /// are skipped, so execution effectively restarts from the first layer
    /// that still has pending work.
    pub async fn execute_workflow(&self, workflow_id: Uuid) -> Result<()> {
        let (mut workflow, tasks) = self
            .repo
            .get_workflow_with_tasks(workflow_id)
            .await?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;

        // A cancelled workflow never re-enters a non-terminal state;
        // completed and failed workflows may be re-run (cron re-fires them)
        if workflow.status == WorkflowStatus::Cancelled {
            return Err(EngineError::InvalidTransition {
                from: workflow.status.to_string(),
                op: "execute",
            });
        }

        let layers = dag::execution_layers(&tasks)?;

        workflow.set_status(WorkflowStatus::Running);
        self.repo.update_workflow(&workflow).await?;
        self.events.publish(StatusEvent::workflow(&workflow)).await?;
        metrics::active_workflows_inc();
        info!(
            workflow_id = %workflow.id,
            name = %workflow.name,
            layers = layers.len(),
            "workflow execution started"
        );

        let started = Utc::now();
        let outcome = self.run_layers(workflow_id, &layers).await;
        metrics::active_workflows_dec();
        let finished = Utc::now();
        let duration = (finished - started).to_std().unwrap_or_default();

        match outcome {
            Ok(LayerOutcome::Finished) => {
                workflow.set_status(WorkflowStatus::Completed);
                self.repo.update_workflow(&workflow).await?;
                self.events.publish(StatusEvent::workflow(&workflow)).await?;
                metrics::record_workflow_execution(&workflow.name, "completed", duration);
                self.append_run(&workflow, started, finished, None).await?;
                info!(workflow_id = %workflow.id, "workflow completed");
                Ok(())
            }
            Ok(LayerOutcome::Interrupted) => {
                // The controller already persisted the paused/cancelled status;
                // publish the observation and stop without marking failure.
                if let Some(current) = self.repo.get_workflow(workflow_id).await? {
                    self.events.publish(StatusEvent::workflow(&current)).await?;
                    self.append_run(&current, started, finished, None).await?;
                    info!(
                        workflow_id = %workflow_id,
                        status = %current.status,
                        "workflow execution halted"
                    );
                }
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                workflow.set_status(WorkflowStatus::Failed);
                self.repo.update_workflow(&workflow).await?;
                self.events
                    .publish(StatusEvent::workflow_failed(&workflow, message.clone()))
                    .await?;
                metrics::record_workflow_execution(&workflow.name, "failed", duration);
                self.append_run(&workflow, started, finished, Some(message))
                    .await?;
                error!(workflow_id = %workflow.id, error = %err, "workflow failed");
                Err(err)
            }
        }
    }

    async fn run_layers(&self, workflow_id: Uuid, layers: &[Vec<String>]) -> Result<LayerOutcome> {
        for layer in layers {
            // Re-read persisted status: the only pause/cancel coordination point
            let current = self
                .repo
                .get_workflow(workflow_id)
                .await?
                .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;
            if matches!(
                current.status,
                WorkflowStatus::Paused | WorkflowStatus::Cancelled
            ) {
                return Ok(LayerOutcome::Interrupted);
            }

            let stored = self.repo.list_tasks(workflow_id).await?;
            let layer_tasks: Vec<Task> = stored
                .into_iter()
                .filter(|task| layer.contains(&task.name))
                .filter(|task| task.status != TaskStatus::Completed)
                .collect();
            if layer_tasks.is_empty() {
                continue;
            }

            let results = join_all(
                layer_tasks
                    .into_iter()
                    .map(|task| self.execute_task_with_retry(task)),
            )
            .await;

            let mut failure: Option<EngineError> = None;
            let mut cancelled = false;
            for result in results {
                match result {
                    Ok(_) => {}
                    Err(EngineError::Cancelled) => cancelled = true,
                    Err(err) => {
                        if failure.is_none() {
                            failure = Some(err);
                        }
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
            if cancelled {
                return Ok(LayerOutcome::Interrupted);
            }
        }
        Ok(LayerOutcome::Finished)
    }

    /// Execute one task under its retry policy and optional timeout.
    ///
    /// Timeouts and runtime errors are retryable; only a `Cancelled` signal
    /// short-circuits the loop without marking failure. Duplicate logical
    /// executions replay the cached result, in-flight duplicates are
    /// rejected with `IdempotencyConflict`.
    pub async fn execute_task_with_retry(&self, mut task: Task) -> Result<Value> {
        let policy = task.retry_policy.clone().unwrap_or_default();

        // Placeholders resolve at dispatch time; the decrypted payload is
        // handed to the action only. Anything derived from it that leaves
        // the attempt (results, error messages) is scrubbed of the resolved
        // secret values first - handlers may echo their payload back.
        let (payload, secret_values) = self
            .variables
            .interpolate_value_with_secrets(&task.action_payload, Some(task.workflow_id))
            .await;

        let key = derive_key(task.workflow_id, &task.name, Some(&payload));
        match self
            .idempotency
            .check(task.workflow_id, &task.name, &key)
            .await?
        {
            IdempotencyOutcome::Cached(record) => {
                let result = record.result.unwrap_or(Value::Null);
                info!(task = %task.name, "duplicate execution, replaying cached result");
                task.set_status(TaskStatus::Completed);
                task.result = Some(result.clone());
                self.repo.update_task(&task).await?;
                self.events
                    .publish(StatusEvent::task_completed(&task, result.clone()))
                    .await?;
                return Ok(result);
            }
            IdempotencyOutcome::InFlight(_) => {
                return Err(EngineError::IdempotencyConflict(key));
            }
            IdempotencyOutcome::Fresh => {}
        }
        let record = self
            .idempotency
            .begin(task.workflow_id, &task.name, &key, Some(&payload))
            .await?;

        for attempt in 0..=policy.max_retries {
            task.retry_count = attempt;
            task.set_status(TaskStatus::Running);
            self.repo.update_task(&task).await?;
            self.events.publish(StatusEvent::task(&task)).await?;

            let started = Utc::now();
            let outcome = self.run_action(&task, payload.clone()).await;
            let finished = Utc::now();
            let duration = (finished - started).to_std().unwrap_or_default();

            match outcome {
                Ok(result) => {
                    let result = redact_secrets(&result, &secret_values);
                    task.set_status(TaskStatus::Completed);
                    task.result = Some(result.clone());
                    self.repo.update_task(&task).await?;
                    self.events
                        .publish(StatusEvent::task_completed(&task, result.clone()))
                        .await?;
                    metrics::record_task_execution(&task.name, "completed", duration);
                    self.idempotency.mark_completed(&record, result.clone()).await?;
                    self.append_attempt(&task, started, finished, None, Some(result.clone()))
                        .await?;
                    return Ok(result);
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    let message = redact_secrets_text(&err.to_string(), &secret_values);
                    if policy.should_retry(attempt) {
                        let delay = policy.calculate_delay(attempt);
                        warn!(
                            task = %task.name,
                            attempt,
                            error = %message,
                            delay_ms = delay.as_millis() as u64,
                            "task attempt failed, retrying"
                        );
                        metrics::record_task_retry(&task.name);
                        self.append_attempt(&task, started, finished, Some(message), None)
                            .await?;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    task.set_status(TaskStatus::Failed);
                    task.result = Some(json!({ "error": message }));
                    self.repo.update_task(&task).await?;
                    self.events
                        .publish(StatusEvent::task_failed(&task, message.clone()))
                        .await?;
                    metrics::record_task_execution(&task.name, "failed", duration);
                    self.idempotency.mark_failed(&record, message.clone()).await?;
                    self.append_attempt(&task, started, finished, Some(message.clone()), None)
                        .await?;
                    error!(task = %task.name, error = %message, "task failed terminally");
                    return Err(EngineError::task_failed(task.name.clone(), message));
                }
            }
        }

        // Should not reach here, but just in case
        Err(EngineError::task_failed(
            task.name.clone(),
            "retry budget exhausted",
        ))
    }

    async fn run_action(&self, task: &Task, payload: Value) -> Result<Value> {
        match task.timeout_seconds {
            Some(seconds) => {
                let limit = StdDuration::from_secs(seconds);
                match tokio::time::timeout(limit, self.actions.dispatch(&task.action_type, payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        task: task.name.clone(),
                        seconds,
                    }),
                }
            }
            None => self.actions.dispatch(&task.action_type, payload).await,
        }
    }

    async fn append_run(
        &self,
        workflow: &Workflow,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<()> {
        self.repo
            .append_workflow_execution(WorkflowExecution {
                id: Uuid::now_v7(),
                workflow_id: workflow.id,
                status: workflow.status,
                started_at,
                finished_at,
                duration_ms: (finished_at - started_at).num_milliseconds(),
                error,
            })
            .await
    }

    async fn append_attempt(
        &self,
        task: &Task,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<()> {
        self.repo
            .append_task_execution(TaskExecution {
                id: Uuid::now_v7(),
                workflow_id: task.workflow_id,
                task_id: task.id,
                task_name: task.name.clone(),
                attempt: task.retry_count,
                status: if error.is_some() {
                    TaskStatus::Failed
                } else {
                    TaskStatus::Completed
                },
                started_at,
                finished_at,
                duration_ms: (finished_at - started_at).num_milliseconds(),
                error,
                result,
            })
            .await
    }
}
