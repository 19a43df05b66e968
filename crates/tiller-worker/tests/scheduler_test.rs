// Integration tests for the cron scheduler: due selection, next_run
// advancement, skip-while-running, dangling-schedule disablement, and
// cooperative shutdown.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use tiller_core::actions::ActionRegistry;
use tiller_core::bus::InMemoryEventSink;
use tiller_core::model::{Task, Workflow, WorkflowSchedule, WorkflowStatus};
use tiller_core::traits::Repository;
use tiller_storage::{generate_encryption_key, MemoryRepository, SecretCipher};
use tiller_worker::{Scheduler, TaskRunner};

fn make_runner(
    repo: MemoryRepository,
    sink: InMemoryEventSink,
) -> TaskRunner<MemoryRepository, InMemoryEventSink> {
    let cipher = SecretCipher::new(&generate_encryption_key()).unwrap();
    TaskRunner::new(repo, sink, ActionRegistry::default(), cipher)
}

async fn seed_workflow(repo: &MemoryRepository) -> Workflow {
    let workflow = Workflow::new("scheduled", None);
    let tasks = vec![Task::new(workflow.id, "only", "echo", json!({}))];
    repo.create_workflow(workflow.clone(), tasks).await.unwrap()
}

async fn wait_for_status(
    repo: &MemoryRepository,
    workflow_id: Uuid,
    status: WorkflowStatus,
) -> bool {
    for _ in 0..50 {
        if repo.get_workflow(workflow_id).await.unwrap().unwrap().status == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_next_run_computation_collapses_missed_firings() {
    // */5: due at 10:03 computes 10:05; firing at 10:05:30 computes 10:10
    let schedule = WorkflowSchedule::new(Uuid::now_v7(), "*/5 * * * *");
    let at_1003 = Utc.with_ymd_and_hms(2024, 3, 1, 10, 3, 0).unwrap();
    assert_eq!(
        schedule.next_after(at_1003).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()
    );

    // Hours of missed firings collapse into a single next instant
    let mut stale = schedule.clone();
    stale.next_run = Some(Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap());
    let fired_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 30).unwrap();
    stale.advance(fired_at).unwrap();
    assert_eq!(
        stale.next_run.unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 10, 0).unwrap()
    );
}

#[tokio::test]
async fn test_due_schedule_fires_and_advances() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();
    let workflow = seed_workflow(&repo).await;

    let mut schedule = WorkflowSchedule::new(workflow.id, "*/5 * * * *");
    schedule.next_run = Some(Utc::now() - chrono::Duration::seconds(30));
    repo.upsert_schedule(schedule).await.unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_secs(60),
    );
    scheduler.run_once().await.unwrap();

    // The schedule advanced into the future and recorded the firing
    let schedule = repo.get_schedule(workflow.id).await.unwrap().unwrap();
    assert!(schedule.last_run.is_some());
    assert!(schedule.next_run.unwrap() > Utc::now());

    // The fire-and-forget execution completes
    assert!(wait_for_status(&repo, workflow.id, WorkflowStatus::Completed).await);

    // Immediately after, the schedule is no longer due
    scheduler.run_once().await.unwrap();
    let again = repo.get_schedule(workflow.id).await.unwrap().unwrap();
    assert_eq!(again.next_run, schedule.next_run);
}

#[tokio::test]
async fn test_future_schedule_not_fired() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();
    let workflow = seed_workflow(&repo).await;

    let mut schedule = WorkflowSchedule::new(workflow.id, "*/5 * * * *");
    schedule.next_run = Some(Utc::now() + chrono::Duration::minutes(4));
    repo.upsert_schedule(schedule).await.unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_secs(60),
    );
    scheduler.run_once().await.unwrap();

    let schedule = repo.get_schedule(workflow.id).await.unwrap().unwrap();
    assert!(schedule.last_run.is_none());
    assert_eq!(
        repo.get_workflow(workflow.id).await.unwrap().unwrap().status,
        WorkflowStatus::Pending
    );
}

#[tokio::test]
async fn test_schedule_with_no_next_run_fires_immediately() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();
    let workflow = seed_workflow(&repo).await;
    repo.upsert_schedule(WorkflowSchedule::new(workflow.id, "*/5 * * * *"))
        .await
        .unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_secs(60),
    );
    scheduler.run_once().await.unwrap();

    assert!(wait_for_status(&repo, workflow.id, WorkflowStatus::Completed).await);
    assert!(repo
        .get_schedule(workflow.id)
        .await
        .unwrap()
        .unwrap()
        .next_run
        .is_some());
}

#[tokio::test]
async fn test_dangling_schedule_disabled() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();

    // Schedule pointing at a workflow that no longer exists
    let ghost_id = Uuid::now_v7();
    repo.upsert_schedule(WorkflowSchedule::new(ghost_id, "*/5 * * * *"))
        .await
        .unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_secs(60),
    );
    scheduler.run_once().await.unwrap();

    let schedule = repo.get_schedule(ghost_id).await.unwrap().unwrap();
    assert!(!schedule.enabled);
}

#[tokio::test]
async fn test_running_workflow_skipped_but_advanced() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();
    let workflow = seed_workflow(&repo).await;

    let mut running = workflow.clone();
    running.set_status(WorkflowStatus::Running);
    repo.update_workflow(&running).await.unwrap();

    repo.upsert_schedule(WorkflowSchedule::new(workflow.id, "*/5 * * * *"))
        .await
        .unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_secs(60),
    );
    scheduler.run_once().await.unwrap();

    // No firing happened (status untouched), but next_run advanced so the
    // scheduler does not re-try on a tight loop
    assert_eq!(
        repo.get_workflow(workflow.id).await.unwrap().unwrap().status,
        WorkflowStatus::Running
    );
    let schedule = repo.get_schedule(workflow.id).await.unwrap().unwrap();
    assert!(schedule.last_run.is_some());
    assert!(schedule.next_run.unwrap() > Utc::now());
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_fires_and_shuts_down() {
    let repo = MemoryRepository::new();
    let sink = InMemoryEventSink::new();
    let workflow = seed_workflow(&repo).await;
    repo.upsert_schedule(WorkflowSchedule::new(workflow.id, "*/5 * * * *"))
        .await
        .unwrap();

    let scheduler = Scheduler::new(
        repo.clone(),
        make_runner(repo.clone(), sink.clone()),
        Duration::from_millis(50),
    );
    let handle = scheduler.spawn();

    // Let a few ticks elapse, then stop cooperatively
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.shutdown();
    handle.await.unwrap();

    let schedule = repo.get_schedule(workflow.id).await.unwrap().unwrap();
    assert!(schedule.last_run.is_some());
}
