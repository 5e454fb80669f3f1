//! End-to-end walk of the capture pipeline against in-process fakes:
//! capture while offline, watch the request land in the durable queue,
//! then restore connectivity and watch reconciliation sync it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;

use floralens::access::{Tier, UsageSnapshot};
use floralens::capture::{CaptureController, DeviceConstraints, StubDevice};
use floralens::error::RemoteError;
use floralens::models::{DeviceSettings, IdentificationResult};
use floralens::queue::{OfflineQueue, SqliteStore, SyncController};
use floralens::remote::{AccountService, IdentificationService};
use floralens::submit::{IdentificationSubmitter, SubmitOutcome};
use floralens::usage::UsageReconciler;

/// Shared "is the network up" switch for both fake services.
struct DemoNetwork {
    offline: AtomicBool,
}

struct DemoIdentify {
    network: Arc<DemoNetwork>,
}

impl IdentificationService for DemoIdentify {
    fn identify(&self, _image_jpeg: &[u8], _user_id: &str) -> Result<IdentificationResult, RemoteError> {
        if self.network.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("network unreachable".into()));
        }
        Ok(IdentificationResult {
            species: "Monstera deliciosa".into(),
            confidence: 0.97,
            description: "Swiss cheese plant, a hardy tropical climber.".into(),
            care_instructions: vec![
                "Water when the top inch of soil is dry".into(),
                "Bright, indirect light".into(),
            ],
            characteristics: vec!["Fenestrated leaves".into(), "Fast grower".into()],
        })
    }
}

struct DemoAccounts {
    network: Arc<DemoNetwork>,
    usage_count: AtomicU32,
}

impl AccountService for DemoAccounts {
    fn tier(&self, _user_id: &str) -> Result<Option<Tier>, RemoteError> {
        Ok(Some(Tier::Free))
    }

    fn usage(&self, _user_id: &str) -> Result<UsageSnapshot, RemoteError> {
        Ok(UsageSnapshot {
            count: self.usage_count.load(Ordering::SeqCst),
        })
    }

    fn increment_usage(&self, _user_id: &str) -> Result<(), RemoteError> {
        if self.network.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("network unreachable".into()));
        }
        self.usage_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("floralens demo starting (network down)");

    let network = Arc::new(DemoNetwork {
        offline: AtomicBool::new(true),
    });
    let service: Arc<dyn IdentificationService> = Arc::new(DemoIdentify {
        network: Arc::clone(&network),
    });
    let accounts = Arc::new(DemoAccounts {
        network: Arc::clone(&network),
        usage_count: AtomicU32::new(0),
    });

    let db_path =
        std::env::temp_dir().join(format!("floralens-demo-{}.sqlite3", std::process::id()));
    let store = SqliteStore::open(db_path)?;
    let queue = OfflineQueue::new(Arc::new(store));
    let usage = Arc::new(UsageReconciler::new(accounts.clone()));

    let mut sync = SyncController::new(false);
    sync.start(
        queue.clone(),
        Arc::clone(&service),
        Arc::clone(&usage),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )?;

    let submitter = IdentificationSubmitter::new(
        Arc::clone(&service),
        queue.clone(),
        Arc::clone(&usage),
        Duration::from_secs(5),
    );
    let controller = CaptureController::new(
        Arc::new(StubDevice::with_resolution(1280, 720)),
        DeviceConstraints::default(),
        accounts.clone(),
        submitter,
        sync.subscribe(),
    );

    // Live capture with a slight brightness lift, confirmed by the user.
    let settings = DeviceSettings {
        brightness_offset: 10,
        ..DeviceSettings::default()
    };
    controller.start_live_capture("demo-user", settings).await?;
    controller.snapshot().await?;
    controller.confirm().await?;

    match controller.submit("demo-user").await? {
        SubmitOutcome::Queued { record_id } => {
            info!("offline, request persisted as {record_id}")
        }
        other => info!("unexpected outcome while offline: {other:?}"),
    }
    info!(
        "unsynced backlog: {} record(s), usage count: {}",
        queue.unsynced_count().await?,
        accounts.usage_count.load(Ordering::SeqCst),
    );

    info!("restoring connectivity");
    network.offline.store(false, Ordering::SeqCst);
    sync.set_online(true);

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if queue.unsynced_count().await? == 0 {
            break;
        }
    }

    for record in queue.history().await? {
        info!(
            "history: {} synced={} summary={:?} attempts={}",
            record.id, record.synced, record.result_summary, record.attempts
        );
    }
    info!(
        "usage count after sync: {}",
        accounts.usage_count.load(Ordering::SeqCst)
    );

    sync.stop().await?;
    info!("demo finished");
    Ok(())
}
