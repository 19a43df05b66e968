// Cron scheduler: fires workflows whose schedules are due
//
// A background loop wakes every `check_interval`, selects enabled schedules
// with `next_run <= now` (or none yet), and fires each due workflow
// fire-and-forget. `next_run` is recomputed from now rather than from the
// previous scheduled instant, so missed firings collapse instead of
// bursting. Shutdown is cooperative; an in-flight tick completes.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tiller_core::error::Result;
use tiller_core::model::{WorkflowSchedule, WorkflowStatus};
use tiller_core::traits::{EventSink, Repository};

use crate::metrics;
use crate::runner::TaskRunner;

/// Background scheduler driving cron-based workflow execution
pub struct Scheduler<R, E> {
    repo: R,
    runner: TaskRunner<R, E>,
    check_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<R, E> Scheduler<R, E>
where
    R: Repository + Clone + Send + Sync + 'static,
    E: EventSink + Clone + Send + Sync + 'static,
{
    pub fn new(repo: R, runner: TaskRunner<R, E>, check_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            repo,
            runner,
            check_interval,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the scheduler loop; runs until `shutdown` is called.
    /// Tick errors are logged and never stop the loop.
    pub fn spawn(&self) -> JoinHandle<()> {
        let repo = self.repo.clone();
        let runner = self.runner.clone();
        let interval = self.check_interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            info!(check_interval_secs = interval.as_secs(), "workflow scheduler started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("workflow scheduler shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = tick(&repo, &runner).await {
                            error!(error = %e, "scheduler tick failed");
                        }
                    }
                }
            }
        })
    }

    /// Signal the loop to stop; an in-flight tick completes
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one scheduling pass immediately (used by tests and embedders)
    pub async fn run_once(&self) -> Result<()> {
        tick(&self.repo, &self.runner).await
    }
}

/// One scheduling pass: select due schedules and fire them
async fn tick<R, E>(repo: &R, runner: &TaskRunner<R, E>) -> Result<()>
where
    R: Repository + Clone + Send + Sync + 'static,
    E: EventSink + Clone + Send + Sync + 'static,
{
    let now = Utc::now();
    let due = repo.list_due_schedules(now).await?;
    debug!(count = due.len(), "due schedules");

    for schedule in due {
        // Per-schedule failures never poison the rest of the tick
        if let Err(e) = fire_schedule(repo, runner, schedule).await {
            error!(error = %e, "failed to fire scheduled workflow");
        }
    }
    Ok(())
}

async fn fire_schedule<R, E>(
    repo: &R,
    runner: &TaskRunner<R, E>,
    mut schedule: WorkflowSchedule,
) -> Result<()>
where
    R: Repository + Clone + Send + Sync + 'static,
    E: EventSink + Clone + Send + Sync + 'static,
{
    let now = Utc::now();

    let Some(workflow) = repo.get_workflow(schedule.workflow_id).await? else {
        error!(
            workflow_id = %schedule.workflow_id,
            "scheduled workflow no longer exists, disabling schedule"
        );
        schedule.enabled = false;
        schedule.updated_at = now;
        repo.update_schedule(&schedule).await?;
        return Ok(());
    };

    if workflow.status == WorkflowStatus::Running {
        // Skip the firing but still advance next_run to avoid tight re-tries
        warn!(
            workflow_id = %workflow.id,
            "workflow already running, skipping scheduled execution"
        );
        schedule.last_run = Some(now);
        schedule.advance(now)?;
        repo.update_schedule(&schedule).await?;
        return Ok(());
    }

    schedule.last_run = Some(now);
    schedule.advance(now)?;
    repo.update_schedule(&schedule).await?;

    info!(
        workflow_id = %workflow.id,
        name = %workflow.name,
        next_run = ?schedule.next_run,
        "firing scheduled workflow"
    );
    metrics::record_scheduled_execution(&workflow.name);

    // Fire-and-forget: the tick never waits on workflow execution
    let runner = runner.clone();
    let workflow_id = workflow.id;
    tokio::spawn(async move {
        if let Err(e) = runner.execute_workflow(workflow_id).await {
            error!(workflow_id = %workflow_id, error = %e, "scheduled execution failed");
        }
    });

    Ok(())
}
