use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::OfflineQueue;
use crate::remote::IdentificationService;
use crate::usage::UsageReconciler;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Supervises the background reconciliation worker. Drains the queue
/// when connectivity returns and on a periodic ticker while online; the
/// online flag is explicit input to every drain decision, not ambient
/// process state.
pub struct SyncController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    online_tx: watch::Sender<bool>,
    online_rx: watch::Receiver<bool>,
}

impl SyncController {
    pub fn new(initially_online: bool) -> Self {
        let (online_tx, online_rx) = watch::channel(initially_online);
        Self {
            handle: None,
            cancel_token: None,
            online_tx,
            online_rx,
        }
    }

    /// Feed the boundary-provided connectivity signal into the worker.
    pub fn set_online(&self, online: bool) {
        let _ = self.online_tx.send(online);
    }

    pub fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// A receiver other components can consult at decision time, e.g.
    /// the submitter choosing between direct submission and queuing.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online_rx.clone()
    }

    pub fn start(
        &mut self,
        queue: OfflineQueue,
        service: Arc<dyn IdentificationService>,
        usage: Arc<UsageReconciler>,
        drain_interval: Duration,
        attempt_timeout: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sync worker already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let online_rx = self.online_rx.clone();

        info!("Starting sync worker (drain every {:?})", drain_interval);
        let handle = tokio::spawn(sync_loop(
            queue,
            service,
            usage,
            online_rx,
            token_clone,
            drain_interval,
            attempt_timeout,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sync worker task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

async fn sync_loop(
    queue: OfflineQueue,
    service: Arc<dyn IdentificationService>,
    usage: Arc<UsageReconciler>,
    mut online_rx: watch::Receiver<bool>,
    cancel_token: CancellationToken,
    drain_interval: Duration,
    attempt_timeout: Duration,
) {
    // Surface interrupted-session backlog on startup.
    match queue.unsynced_count().await {
        Ok(0) => {}
        Ok(backlog) => log_info!("sync worker starting with {backlog} unsynced records"),
        Err(err) => log_error!("failed to read unsynced backlog: {err}"),
    }

    let mut ticker = tokio::time::interval(drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                usage.retry_pending().await;
                if *online_rx.borrow() {
                    run_drain(&queue, &service, &usage, attempt_timeout).await;
                }
            }
            changed = online_rx.changed() => {
                if changed.is_err() {
                    log_warn!("connectivity channel closed; sync worker exiting");
                    break;
                }
                if *online_rx.borrow() {
                    log_info!("connectivity regained, draining queue");
                    run_drain(&queue, &service, &usage, attempt_timeout).await;
                } else {
                    log_info!("connectivity lost, sync paused");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sync worker shutting down");
                break;
            }
        }
    }
}

async fn run_drain(
    queue: &OfflineQueue,
    service: &Arc<dyn IdentificationService>,
    usage: &UsageReconciler,
    attempt_timeout: Duration,
) {
    match queue.drain(Arc::clone(service), usage, attempt_timeout).await {
        Ok(report) if report.attempted > 0 => {
            log_info!(
                "drain pass synced {}/{} records ({} still pending)",
                report.synced,
                report.attempted,
                report.failed
            );
        }
        Ok(_) => {}
        Err(err) => log_error!("drain pass failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::RemoteError;
    use crate::models::{IdentificationResult, PendingIdentification};
    use crate::queue::{DurableStore, MemoryStore};
    use crate::remote::AccountService;

    struct OkService;

    impl IdentificationService for OkService {
        fn identify(
            &self,
            _image_jpeg: &[u8],
            _user_id: &str,
        ) -> Result<IdentificationResult, RemoteError> {
            Ok(IdentificationResult {
                species: "Aloe vera".into(),
                confidence: 0.88,
                description: "Succulent".into(),
                care_instructions: vec![],
                characteristics: vec![],
            })
        }
    }

    struct NullAccounts;

    impl AccountService for NullAccounts {
        fn tier(&self, _: &str) -> Result<Option<crate::access::Tier>, RemoteError> {
            Ok(None)
        }
        fn usage(&self, _: &str) -> Result<crate::access::UsageSnapshot, RemoteError> {
            Ok(crate::access::UsageSnapshot::default())
        }
        fn increment_usage(&self, _: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn connectivity_signal_triggers_a_drain() {
        let store = Arc::new(MemoryStore::new());
        let queue = OfflineQueue::new(store.clone());
        let service = Arc::new(OkService);
        let usage = Arc::new(UsageReconciler::new(Arc::new(NullAccounts)));

        queue
            .enqueue(PendingIdentification::new(
                "a".into(),
                "user-1".into(),
                vec![1],
                chrono::Utc::now(),
                false,
            ))
            .await
            .unwrap();

        let mut controller = SyncController::new(false);
        controller
            .start(
                queue.clone(),
                service.clone(),
                usage,
                Duration::from_secs(3600),
                Duration::from_secs(5),
            )
            .unwrap();

        // Offline: the record must stay put.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.unsynced_count().await.unwrap(), 1);

        controller.set_online(true);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if queue.unsynced_count().await.unwrap() == 0 {
                break;
            }
        }
        assert_eq!(queue.unsynced_count().await.unwrap(), 0);
        let synced = store.get("a").unwrap().unwrap();
        assert!(synced.synced);
        assert!(synced.result_summary.is_some());

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_stop_is_reentrant() {
        let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
        let service = Arc::new(OkService);
        let usage = Arc::new(UsageReconciler::new(Arc::new(NullAccounts)));

        let mut controller = SyncController::new(true);
        controller
            .start(
                queue.clone(),
                service.clone(),
                usage.clone(),
                Duration::from_secs(3600),
                Duration::from_secs(5),
            )
            .unwrap();
        assert!(controller
            .start(queue, service, usage, Duration::from_secs(3600), Duration::from_secs(5))
            .is_err());

        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
    }
}
