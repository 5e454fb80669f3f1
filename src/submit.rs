use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use log::{error, info, warn};
use uuid::Uuid;

use crate::error::RemoteError;
use crate::models::{IdentificationResult, PendingIdentification};
use crate::queue::OfflineQueue;
use crate::remote::IdentificationService;
use crate::usage::UsageReconciler;

/// Terminal result of handing a finalized blob to the submitter.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Synchronous success; the result is available immediately.
    Completed(IdentificationResult),
    /// Persisted for reconciliation; the queue owns the record now.
    Queued { record_id: String },
    /// Not retried: permanent remote rejection or local failure.
    Failed { reason: String },
}

/// Turns a finalized image blob plus user context into an
/// identification request, classifying failures into transient
/// (queue-worthy) and permanent (surfaced, not queued).
pub struct IdentificationSubmitter {
    service: Arc<dyn IdentificationService>,
    queue: OfflineQueue,
    usage: Arc<UsageReconciler>,
    request_timeout: Duration,
}

impl IdentificationSubmitter {
    pub fn new(
        service: Arc<dyn IdentificationService>,
        queue: OfflineQueue,
        usage: Arc<UsageReconciler>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            queue,
            usage,
            request_timeout,
        }
    }

    /// Submit one finalized blob. `online` is the connectivity state at
    /// decision time, passed in explicitly; `counts_against_quota`
    /// records whether the admitting gate decision consumed a free-tier
    /// unit (usage is recorded here only for synchronous completions;
    /// queued records defer it to sync time).
    pub async fn submit(
        &self,
        user_id: &str,
        image_jpeg: Vec<u8>,
        counts_against_quota: bool,
        online: bool,
    ) -> Result<SubmitOutcome> {
        if !online {
            info!("offline at submit time, queuing identification for {user_id}");
            return self
                .enqueue(user_id, image_jpeg, counts_against_quota)
                .await;
        }

        let service = Arc::clone(&self.service);
        let user = user_id.to_string();
        let image = image_jpeg.clone();
        let attempt = tokio::time::timeout(
            self.request_timeout,
            tokio::task::spawn_blocking(move || service.identify(&image, &user)),
        )
        .await;

        match attempt {
            Ok(Ok(Ok(result))) => {
                if counts_against_quota {
                    self.usage.record_usage(user_id).await;
                }
                Ok(SubmitOutcome::Completed(result))
            }
            Ok(Ok(Err(RemoteError::Permanent(reason)))) => {
                warn!("identification rejected permanently for {user_id}: {reason}");
                Ok(SubmitOutcome::Failed { reason })
            }
            Ok(Ok(Err(err @ RemoteError::Transient(_)))) => {
                warn!("transient identification failure for {user_id}, queuing: {err}");
                self.enqueue(user_id, image_jpeg, counts_against_quota)
                    .await
            }
            Ok(Err(join_err)) => {
                warn!("identification task failed to join, queuing: {join_err}");
                self.enqueue(user_id, image_jpeg, counts_against_quota)
                    .await
            }
            Err(_) => {
                warn!("identification timed out after {:?}, queuing", self.request_timeout);
                self.enqueue(user_id, image_jpeg, counts_against_quota)
                    .await
            }
        }
    }

    async fn enqueue(
        &self,
        user_id: &str,
        image_jpeg: Vec<u8>,
        counts_against_quota: bool,
    ) -> Result<SubmitOutcome> {
        let record = PendingIdentification::new(
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            image_jpeg,
            Utc::now(),
            counts_against_quota,
        );
        let record_id = record.id.clone();

        match self.queue.enqueue(record).await {
            Ok(()) => {
                info!("identification queued as {record_id}");
                Ok(SubmitOutcome::Queued { record_id })
            }
            Err(err) => {
                // A failed durable write is fatal to this attempt and
                // must reach the caller, never vanish.
                error!("failed to persist pending identification: {err}");
                Ok(SubmitOutcome::Failed {
                    reason: format!("could not persist request for later sync: {err}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::access::{Tier, UsageSnapshot};
    use crate::queue::{DurableStore, MemoryStore};
    use crate::remote::AccountService;

    const TIMEOUT: Duration = Duration::from_secs(5);

    enum Script {
        Succeed,
        Transient,
        Permanent,
    }

    struct ScriptedService {
        script: Script,
        calls: AtomicU32,
    }

    impl ScriptedService {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl IdentificationService for ScriptedService {
        fn identify(
            &self,
            _image_jpeg: &[u8],
            _user_id: &str,
        ) -> Result<IdentificationResult, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script {
                Script::Succeed => Ok(IdentificationResult {
                    species: "Monstera deliciosa".into(),
                    confidence: 0.97,
                    description: "Swiss cheese plant".into(),
                    care_instructions: vec!["Water weekly".into()],
                    characteristics: vec!["Fenestrated leaves".into()],
                }),
                Script::Transient => Err(RemoteError::Transient("503 service unavailable".into())),
                Script::Permanent => Err(RemoteError::Permanent("415 unsupported media".into())),
            }
        }
    }

    #[derive(Default)]
    struct CountingAccounts {
        increments: AtomicU32,
    }

    impl AccountService for CountingAccounts {
        fn tier(&self, _: &str) -> Result<Option<Tier>, RemoteError> {
            Ok(Some(Tier::Free))
        }
        fn usage(&self, _: &str) -> Result<UsageSnapshot, RemoteError> {
            Ok(UsageSnapshot::default())
        }
        fn increment_usage(&self, _: &str) -> Result<(), RemoteError> {
            self.increments.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Store that refuses every write, for the surfaced-failure path.
    struct BrokenStore;

    impl DurableStore for BrokenStore {
        fn insert(&self, _: &PendingIdentification) -> Result<(), crate::error::StorageError> {
            Err(crate::error::StorageError::Write("disk full".into()))
        }
        fn get(
            &self,
            _: &str,
        ) -> Result<Option<PendingIdentification>, crate::error::StorageError> {
            Ok(None)
        }
        fn list_unsynced(&self) -> Result<Vec<PendingIdentification>, crate::error::StorageError> {
            Ok(vec![])
        }
        fn list_all(&self) -> Result<Vec<PendingIdentification>, crate::error::StorageError> {
            Ok(vec![])
        }
        fn record_attempt(
            &self,
            _: &str,
            _: chrono::DateTime<chrono::Utc>,
        ) -> Result<(), crate::error::StorageError> {
            Ok(())
        }
        fn mark_synced(&self, _: &str, _: &str) -> Result<(), crate::error::StorageError> {
            Ok(())
        }
        fn unsynced_count(&self) -> Result<u32, crate::error::StorageError> {
            Ok(0)
        }
    }

    fn submitter(
        service: Arc<ScriptedService>,
        store: Arc<dyn DurableStore>,
    ) -> (IdentificationSubmitter, Arc<CountingAccounts>) {
        let accounts = Arc::new(CountingAccounts::default());
        let usage = Arc::new(UsageReconciler::new(accounts.clone()));
        (
            IdentificationSubmitter::new(service, OfflineQueue::new(store), usage, TIMEOUT),
            accounts,
        )
    }

    #[tokio::test]
    async fn offline_submission_queues_without_calling_the_service() {
        let service = ScriptedService::new(Script::Succeed);
        let store = Arc::new(MemoryStore::new());
        let (submitter, accounts) = submitter(service.clone(), store.clone());

        let outcome = submitter.submit("user-1", vec![1, 2], true, false).await.unwrap();
        let SubmitOutcome::Queued { record_id } = outcome else {
            panic!("expected Queued, got {outcome:?}");
        };

        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
        let record = store.get(&record_id).unwrap().unwrap();
        assert!(!record.synced);
        assert!(record.counts_against_quota);
        // Usage is deferred until the record syncs.
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failure_falls_back_to_the_queue() {
        let service = ScriptedService::new(Script::Transient);
        let store = Arc::new(MemoryStore::new());
        let (submitter, _) = submitter(service.clone(), store.clone());

        let outcome = submitter.submit("user-1", vec![1], false, true).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(store.unsynced_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn permanent_failure_is_surfaced_and_never_queued() {
        let service = ScriptedService::new(Script::Permanent);
        let store = Arc::new(MemoryStore::new());
        let (submitter, _) = submitter(service.clone(), store.clone());

        let outcome = submitter.submit("user-1", vec![1], false, true).await.unwrap();
        let SubmitOutcome::Failed { reason } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        assert!(reason.contains("415"));
        assert_eq!(store.unsynced_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn synchronous_free_tier_completion_records_usage_once() {
        let service = ScriptedService::new(Script::Succeed);
        let (submitter, accounts) = submitter(service, Arc::new(MemoryStore::new()));

        let outcome = submitter.submit("user-1", vec![1], true, true).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn premium_completion_skips_usage_recording() {
        let service = ScriptedService::new(Script::Succeed);
        let (submitter, accounts) = submitter(service, Arc::new(MemoryStore::new()));

        let outcome = submitter.submit("user-1", vec![1], false, true).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed(_)));
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn storage_failure_surfaces_in_the_outcome() {
        let service = ScriptedService::new(Script::Succeed);
        let (submitter, _) = submitter(service, Arc::new(BrokenStore));

        let outcome = submitter.submit("user-1", vec![1], false, false).await.unwrap();
        let SubmitOutcome::Failed { reason } = outcome else {
            panic!("expected Failed, got {outcome:?}");
        };
        assert!(reason.contains("disk full"));
    }
}
