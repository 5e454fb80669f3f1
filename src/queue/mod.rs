mod migrations;
mod store;
mod sync;

pub use store::{DurableStore, MemoryStore, SqliteStore};
pub use sync::SyncController;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{error, warn};
use serde::Serialize;

use crate::error::StorageError;
use crate::models::PendingIdentification;
use crate::remote::IdentificationService;
use crate::usage::UsageReconciler;

/// Outcome of one finite drain pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: u32,
    pub synced: u32,
    pub failed: u32,
}

/// Durable FIFO of identification requests that could not complete
/// synchronously. Records are owned by the queue once enqueued; synced
/// records are kept as local history, never purged here.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn DurableStore>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Persist a record. The durable write completes before this
    /// returns; a crash afterwards loses nothing. Failures surface as
    /// `StorageError` and are never swallowed.
    pub async fn enqueue(&self, record: PendingIdentification) -> Result<(), StorageError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.insert(&record))
            .await
            .map_err(|err| StorageError::Write(format!("enqueue task join failed: {err}")))?
    }

    pub async fn unsynced_count(&self) -> Result<u32, StorageError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.unsynced_count())
            .await
            .map_err(|err| StorageError::Read(format!("count task join failed: {err}")))?
    }

    /// Full local history, newest first.
    pub async fn history(&self) -> Result<Vec<PendingIdentification>, StorageError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.list_all())
            .await
            .map_err(|err| StorageError::Read(format!("history task join failed: {err}")))?
    }

    /// One finite pass over the unsynced backlog, oldest record first.
    ///
    /// Each record gets a single remote attempt bounded by
    /// `attempt_timeout`; failures leave the record unsynced for the
    /// next pass. Records flagged `counts_against_quota` trigger exactly
    /// one usage-recording call, here at sync time. A record enqueued
    /// while this pass runs is picked up by the next pass; the store
    /// worker serializes access so nothing is lost or duplicated.
    pub async fn drain(
        &self,
        service: Arc<dyn IdentificationService>,
        usage: &UsageReconciler,
        attempt_timeout: Duration,
    ) -> Result<DrainReport, StorageError> {
        let store = Arc::clone(&self.store);
        let batch = tokio::task::spawn_blocking(move || store.list_unsynced())
            .await
            .map_err(|err| StorageError::Read(format!("drain listing join failed: {err}")))??;

        let mut report = DrainReport::default();
        for record in batch {
            report.attempted += 1;

            let store = Arc::clone(&self.store);
            let id = record.id.clone();
            if let Err(err) =
                tokio::task::spawn_blocking(move || store.record_attempt(&id, Utc::now()))
                    .await
                    .unwrap_or_else(|err| Err(StorageError::Write(err.to_string())))
            {
                warn!("failed to record sync attempt for {}: {err}", record.id);
            }

            let service = Arc::clone(&service);
            let image = record.image_jpeg.clone();
            let user_id = record.user_id.clone();
            let attempt = tokio::time::timeout(
                attempt_timeout,
                tokio::task::spawn_blocking(move || service.identify(&image, &user_id)),
            )
            .await;

            // On timeout the blocking call keeps running in the
            // background, but the drain no longer waits on it.
            let result = match attempt {
                Err(_) => {
                    warn!("sync attempt for {} timed out", record.id);
                    report.failed += 1;
                    continue;
                }
                Ok(Err(err)) => {
                    error!("sync attempt task for {} failed to join: {err}", record.id);
                    report.failed += 1;
                    continue;
                }
                Ok(Ok(Err(err))) => {
                    if err.is_transient() {
                        warn!("sync attempt for {} failed, will retry: {err}", record.id);
                    } else {
                        error!("record {} rejected by remote service: {err}", record.id);
                    }
                    report.failed += 1;
                    continue;
                }
                Ok(Ok(Ok(result))) => result,
            };

            let store = Arc::clone(&self.store);
            let id = record.id.clone();
            let summary = result.summary();
            let marked = tokio::task::spawn_blocking(move || store.mark_synced(&id, &summary))
                .await
                .unwrap_or_else(|err| Err(StorageError::Write(err.to_string())));

            match marked {
                Ok(()) => {
                    report.synced += 1;
                    if record.counts_against_quota {
                        usage.record_usage(&record.user_id).await;
                    }
                }
                Err(err) => {
                    // The remote accepted the image but the local flag
                    // didn't stick; the record will be re-submitted.
                    error!("failed to mark {} synced: {err}", record.id);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
