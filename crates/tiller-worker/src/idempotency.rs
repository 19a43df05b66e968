// Idempotency key lifecycle: dedup, cached replay, TTL cleanup
//
// A logical execution is identified by `workflow_id:task_name[:payload_hash]`
// where the payload hash is the first 16 hex chars of the SHA-256 over the
// canonicalized payload. Expired records count as absent; `failed` records
// are retry-eligible.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use tiller_core::canonical;
use tiller_core::error::Result;
use tiller_core::model::{IdempotencyRecord, IdempotencyStatus};
use tiller_core::traits::Repository;

/// Outcome of an idempotency lookup
#[derive(Debug, Clone)]
pub enum IdempotencyOutcome {
    /// No usable record; the caller proceeds and registers one
    Fresh,
    /// A `processing` record exists; the caller must not execute
    InFlight(IdempotencyRecord),
    /// A `completed` record exists; the caller replays its result
    Cached(IdempotencyRecord),
}

/// Service for idempotency record lifecycle
#[derive(Clone)]
pub struct IdempotencyService<R> {
    repo: R,
    ttl: Duration,
}

/// Deterministic key for one logical execution:
/// `workflow_id:task_name[:payload_hash16]`
pub fn derive_key(workflow_id: Uuid, task_name: &str, payload: Option<&Value>) -> String {
    match payload {
        Some(payload) => format!(
            "{workflow_id}:{task_name}:{}",
            canonical::payload_fingerprint(payload)
        ),
        None => format!("{workflow_id}:{task_name}"),
    }
}

impl<R: Repository + Clone> IdempotencyService<R> {
    pub fn new(repo: R, ttl: StdDuration) -> Self {
        Self {
            repo,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    /// Classify the current state of `(workflow_id, task_name, key)`.
    /// Expired records are deleted on the spot and reported as `Fresh`.
    pub async fn check(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        key: &str,
    ) -> Result<IdempotencyOutcome> {
        let Some(record) = self.repo.get_idempotency(workflow_id, task_name, key).await? else {
            return Ok(IdempotencyOutcome::Fresh);
        };

        if record.is_expired(Utc::now()) {
            debug!(key = %key, "idempotency record expired, deleting");
            self.repo.delete_idempotency(record.id).await?;
            return Ok(IdempotencyOutcome::Fresh);
        }

        match record.status {
            IdempotencyStatus::Processing => Ok(IdempotencyOutcome::InFlight(record)),
            IdempotencyStatus::Completed => Ok(IdempotencyOutcome::Cached(record)),
            IdempotencyStatus::Failed => Ok(IdempotencyOutcome::Fresh),
        }
    }

    /// Register a `processing` record for an execution about to start
    pub async fn begin(
        &self,
        workflow_id: Uuid,
        task_name: &str,
        key: &str,
        payload: Option<&Value>,
    ) -> Result<IdempotencyRecord> {
        let mut record = IdempotencyRecord {
            id: Uuid::now_v7(),
            workflow_id,
            task_name: task_name.to_string(),
            key: key.to_string(),
            status: IdempotencyStatus::Processing,
            result: None,
            error_message: None,
            request_hash: payload.map(canonical::checksum),
            execution_id: None,
            created_at: Utc::now(),
            completed_at: None,
            expires_at: None,
        };
        record.set_ttl(self.ttl);
        self.repo.upsert_idempotency(record).await
    }

    /// Finish a record with its cached result
    pub async fn mark_completed(&self, record: &IdempotencyRecord, result: Value) -> Result<()> {
        let mut record = record.clone();
        record.status = IdempotencyStatus::Completed;
        record.result = Some(result);
        record.completed_at = Some(Utc::now());
        self.repo.upsert_idempotency(record).await?;
        Ok(())
    }

    /// Finish a record as failed; a later execution may retry
    pub async fn mark_failed(
        &self,
        record: &IdempotencyRecord,
        error_message: impl Into<String>,
    ) -> Result<()> {
        let mut record = record.clone();
        record.status = IdempotencyStatus::Failed;
        record.error_message = Some(error_message.into());
        record.completed_at = Some(Utc::now());
        self.repo.upsert_idempotency(record).await?;
        Ok(())
    }

    /// Delete expired records; returns the number removed
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let removed = self.repo.delete_expired_idempotency(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "cleaned up expired idempotency records");
        }
        Ok(removed)
    }
}

// ============================================================================
// Sweeper - periodic TTL cleanup
// ============================================================================

/// Background loop that sweeps expired idempotency records
pub struct IdempotencySweeper<R> {
    service: IdempotencyService<R>,
    interval: StdDuration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<R: Repository + Clone + Send + Sync + 'static> IdempotencySweeper<R> {
    pub fn new(service: IdempotencyService<R>, interval: StdDuration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            service,
            interval,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Spawn the sweep loop; runs until `shutdown` is called
    pub fn spawn(&self) -> JoinHandle<()> {
        let service = self.service.clone();
        let interval = self.interval;
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "idempotency sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("idempotency sweeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = service.cleanup_expired().await {
                            error!(error = %e, "idempotency sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// Signal the sweeper to stop; an in-flight sweep completes
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tiller_storage::MemoryRepository;

    fn service() -> IdempotencyService<MemoryRepository> {
        IdempotencyService::new(MemoryRepository::new(), StdDuration::from_secs(3600))
    }

    #[test]
    fn test_key_derivation_deterministic() {
        let workflow_id = Uuid::now_v7();
        let a = derive_key(workflow_id, "send", Some(&json!({"b": 2, "a": 1})));
        let b = derive_key(workflow_id, "send", Some(&json!({"a": 1, "b": 2})));
        assert_eq!(a, b);

        let parts: Vec<&str> = a.splitn(3, ':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "send");
        assert_eq!(parts[2].len(), 16);

        let bare = derive_key(workflow_id, "send", None);
        assert_eq!(bare, format!("{workflow_id}:send"));
    }

    #[tokio::test]
    async fn test_lifecycle_fresh_inflight_cached() {
        let service = service();
        let workflow_id = Uuid::now_v7();
        let key = "k1";

        assert!(matches!(
            service.check(workflow_id, "t", key).await.unwrap(),
            IdempotencyOutcome::Fresh
        ));

        let record = service.begin(workflow_id, "t", key, None).await.unwrap();
        assert!(matches!(
            service.check(workflow_id, "t", key).await.unwrap(),
            IdempotencyOutcome::InFlight(_)
        ));

        service
            .mark_completed(&record, json!({"n": 1}))
            .await
            .unwrap();
        match service.check(workflow_id, "t", key).await.unwrap() {
            IdempotencyOutcome::Cached(cached) => {
                assert_eq!(cached.result, Some(json!({"n": 1})));
            }
            other => panic!("expected Cached, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cached_result_stable_across_reads() {
        let service = service();
        let workflow_id = Uuid::now_v7();
        let record = service.begin(workflow_id, "t", "k", None).await.unwrap();
        service
            .mark_completed(&record, json!({"answer": 42}))
            .await
            .unwrap();

        for _ in 0..2 {
            match service.check(workflow_id, "t", "k").await.unwrap() {
                IdempotencyOutcome::Cached(cached) => {
                    assert_eq!(cached.result, Some(json!({"answer": 42})));
                }
                other => panic!("expected Cached, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failed_record_is_retry_eligible() {
        let service = service();
        let workflow_id = Uuid::now_v7();
        let record = service.begin(workflow_id, "t", "k", None).await.unwrap();
        service.mark_failed(&record, "boom").await.unwrap();

        assert!(matches!(
            service.check(workflow_id, "t", "k").await.unwrap(),
            IdempotencyOutcome::Fresh
        ));
    }

    #[tokio::test]
    async fn test_expired_record_treated_as_absent() {
        let repo = MemoryRepository::new();
        let service = IdempotencyService::new(repo.clone(), StdDuration::from_secs(3600));
        let workflow_id = Uuid::now_v7();

        let mut record = service.begin(workflow_id, "t", "k", None).await.unwrap();
        record.expires_at = Some(Utc::now() - Duration::hours(1));
        repo.upsert_idempotency(record).await.unwrap();

        assert!(matches!(
            service.check(workflow_id, "t", "k").await.unwrap(),
            IdempotencyOutcome::Fresh
        ));
        // The expired row was deleted on read
        assert!(repo
            .get_idempotency(workflow_id, "t", "k")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired() {
        let repo = MemoryRepository::new();
        let service = IdempotencyService::new(repo.clone(), StdDuration::from_secs(3600));
        let workflow_id = Uuid::now_v7();
        let mut record = service.begin(workflow_id, "t", "k", None).await.unwrap();
        record.expires_at = Some(Utc::now() - Duration::hours(1));
        repo.upsert_idempotency(record).await.unwrap();

        assert_eq!(service.cleanup_expired().await.unwrap(), 1);
        assert_eq!(service.cleanup_expired().await.unwrap(), 0);
    }
}
