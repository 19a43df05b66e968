// End-to-end example: declare a diamond workflow, store a secret, execute,
// and watch status events stream by.
//
// Run with: cargo run -p tiller-worker --example quickstart

use async_trait::async_trait;
use serde_json::{json, Value};
use tiller_core::actions::{ActionHandler, ActionRegistry, SleepAction};
use tiller_core::bus::EventBus;
use tiller_core::dag;
use tiller_core::error::Result;
use tiller_core::model::{Task, Workflow};
use tiller_core::traits::Repository;
use tiller_storage::{generate_encryption_key, MemoryRepository, SecretCipher};
use tiller_worker::TaskRunner;

/// Pretend HTTP client: consumes the interpolated auth header and returns a
/// result that never echoes it back
struct HttpAction;

#[async_trait]
impl ActionHandler for HttpAction {
    fn action_type(&self) -> &str {
        "http_request"
    }

    async fn execute(&self, payload: Value) -> Result<Value> {
        let authenticated = payload
            .get("auth")
            .and_then(|v| v.as_str())
            .map(|auth| auth.starts_with("Bearer ") && !auth.contains("${"))
            .unwrap_or(false);
        Ok(json!({"status": 200, "url": payload["url"], "authenticated": authenticated}))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let repo = MemoryRepository::new();
    let bus = EventBus::default();
    let cipher = SecretCipher::new(&generate_encryption_key())?;

    // fetch -> {resize, tag} -> publish
    let workflow = Workflow::new("image-pipeline", Some("resize and tag uploads".into()));
    let tasks = vec![
        Task::new(
            workflow.id,
            "fetch",
            "http_request",
            json!({"url": "${var:source_url}", "auth": "Bearer ${secret:api_key}"}),
        ),
        Task::new(workflow.id, "resize", "sleep", json!({"duration_seconds": 0.1}))
            .with_dependencies(vec!["fetch".into()]),
        Task::new(workflow.id, "tag", "sleep", json!({"duration_seconds": 0.1}))
            .with_dependencies(vec!["fetch".into()]),
        Task::new(workflow.id, "publish", "http_request", json!({"url": "https://cdn.example.com"}))
            .with_dependencies(vec!["resize".into(), "tag".into()]),
    ];
    dag::validate(&tasks)?;
    repo.create_workflow(workflow.clone(), tasks).await?;

    let runner = TaskRunner::new(
        repo.clone(),
        bus.clone(),
        ActionRegistry::builder()
            .handler(HttpAction)
            .handler(SleepAction)
            .build(),
        cipher,
    );
    runner
        .variables()
        .set_workflow_variable(workflow.id, "source_url", "https://example.com/img", None)
        .await?;
    runner
        .variables()
        .set_workflow_secret(workflow.id, "api_key", "demo-secret", None)
        .await?;

    let mut events = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {}", event.to_json());
        }
    });

    runner.execute_workflow(workflow.id).await?;

    let history = repo.list_workflow_executions(workflow.id, 10).await?;
    println!("runs recorded: {}", history.len());
    printer.abort();
    Ok(())
}
