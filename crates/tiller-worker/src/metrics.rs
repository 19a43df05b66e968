// Metric recording via the `metrics` facade
//
// The engine only records; exporter wiring (Prometheus or otherwise) is the
// embedding process's concern. All helpers are safe to call with no recorder
// installed.

use std::time::Duration;

/// Count one finished workflow run, labelled by name and terminal status
pub fn record_workflow_execution(workflow: &str, status: &str, duration: Duration) {
    metrics::counter!(
        "workflow_executions_total",
        "workflow" => workflow.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "workflow_duration_seconds",
        "workflow" => workflow.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count one finished task attempt, labelled by task name and status
pub fn record_task_execution(task: &str, status: &str, duration: Duration) {
    metrics::counter!(
        "task_executions_total",
        "task" => task.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "task_duration_seconds",
        "task" => task.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count one retry of a task
pub fn record_task_retry(task: &str) {
    metrics::counter!(
        "task_retries_total",
        "task" => task.to_string()
    )
    .increment(1);
}

/// Count one cron-triggered firing of a workflow
pub fn record_scheduled_execution(workflow: &str) {
    metrics::counter!(
        "scheduled_executions_total",
        "workflow" => workflow.to_string()
    )
    .increment(1);
}

/// Track the number of currently running workflows
pub fn active_workflows_inc() {
    metrics::gauge!("active_workflows").increment(1.0);
}

pub fn active_workflows_dec() {
    metrics::gauge!("active_workflows").decrement(1.0);
}
