use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::access::{check_access, AccessReason, FeatureAccessDecision, FeatureKind, UsageSnapshot};
use crate::models::{DeviceSettings, FocusHint, SourceImage};
use crate::remote::AccountService;
use crate::submit::{IdentificationSubmitter, SubmitOutcome};

use super::device::{AcquiredDevice, CaptureDevice, DeviceConstraints};
use super::raster;
use super::state::{CapturePhase, CaptureSession};

/// Snapshot triggers closer together than one animation frame are
/// treated as duplicates of the same user action.
pub const SNAPSHOT_DEBOUNCE: Duration = Duration::from_millis(16);

/// Lightweight view of the current session for callers that only render
/// state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub phase: CapturePhase,
    pub session_id: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Debug)]
pub enum StartOutcome {
    /// Device acquired, session is `DeviceActive`.
    Started,
    /// Another session is in flight; this call was a no-op.
    AlreadyActive,
    /// Gate refusal; the decision carries the upgrade-path reason.
    Denied(FeatureAccessDecision),
    /// Acquisition failed (permission/hardware). Non-fatal: the machine
    /// stays `Idle` and the file picker remains usable.
    DeviceUnavailable(String),
}

#[derive(Debug)]
pub enum PickOutcome {
    /// File accepted, session is `Captured`.
    Captured,
    AlreadyActive,
    Denied(FeatureAccessDecision),
    /// Validation rejection (size or MIME type); session is `Failed`.
    Rejected(String),
}

#[derive(Debug)]
pub enum SnapshotOutcome {
    Captured,
    /// Duplicate trigger within one animation frame, dropped.
    Debounced,
    /// No live device session to snapshot.
    NotActive,
    /// Frame grab or pixel transform failed; the handle was still
    /// released and the session is `Failed`.
    Failed(String),
}

/// Owns the capture session and drives it through
/// `Idle → DeviceActive/Captured → Confirmed → Submitting → terminal`.
///
/// The device handle is a sole-owner resource: it lives in
/// `active_device` between start and snapshot, wrapped in a guard that
/// releases on every exit path including controller teardown.
pub struct CaptureController {
    session: Arc<Mutex<CaptureSession>>,
    device: Arc<dyn CaptureDevice>,
    constraints: DeviceConstraints,
    accounts: Arc<dyn AccountService>,
    submitter: IdentificationSubmitter,
    online_rx: watch::Receiver<bool>,
    active_device: Arc<Mutex<Option<AcquiredDevice>>>,
    last_snapshot_trigger: std::sync::Mutex<Option<Instant>>,
}

impl CaptureController {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        constraints: DeviceConstraints,
        accounts: Arc<dyn AccountService>,
        submitter: IdentificationSubmitter,
        online_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(CaptureSession::new())),
            device,
            constraints,
            accounts,
            submitter,
            online_rx,
            active_device: Arc::new(Mutex::new(None)),
            last_snapshot_trigger: std::sync::Mutex::new(None),
        }
    }

    pub async fn status(&self) -> CaptureSnapshot {
        let session = self.session.lock().await;
        CaptureSnapshot {
            phase: session.phase,
            session_id: session.session_id.clone(),
            failure_reason: session.failure_reason.clone(),
        }
    }

    /// `Idle → DeviceActive`. The gate runs first so a denied attempt
    /// never acquires capture hardware.
    pub async fn start_live_capture(
        &self,
        user_id: &str,
        settings: DeviceSettings,
    ) -> Result<StartOutcome> {
        {
            let session = self.session.lock().await;
            if !session.can_start() {
                info!("capture already in flight ({}), ignoring start", session.phase.as_str());
                return Ok(StartOutcome::AlreadyActive);
            }
        }

        let decision = self.evaluate_gate(user_id).await?;
        if !decision.has_access {
            info!("capture denied for {user_id}: {:?}", decision.reason);
            return Ok(StartOutcome::Denied(decision));
        }

        let device = Arc::clone(&self.device);
        let constraints = self.constraints.clone();
        let acquired = tokio::task::spawn_blocking(move || device.acquire(&constraints))
            .await
            .context("device acquire task join failed")?;

        let handle = match acquired {
            Ok(handle) => handle,
            Err(err) => {
                warn!("device acquisition failed: {err}");
                return Ok(StartOutcome::DeviceUnavailable(err.to_string()));
            }
        };
        info!("device granted {}x{} frames", handle.width, handle.height);

        let mut guard = AcquiredDevice::new(Arc::clone(&self.device), handle);
        let mut session = self.session.lock().await;
        if !session.can_start() {
            // Lost the race to a concurrent start; give the handle back.
            guard.release();
            return Ok(StartOutcome::AlreadyActive);
        }

        session.begin_device(
            Uuid::new_v4().to_string(),
            settings,
            decision.reason,
            Utc::now(),
        );
        *self.active_device.lock().await = Some(guard);
        Ok(StartOutcome::Started)
    }

    /// `Idle → Captured` directly from the file picker, bypassing
    /// device acquisition entirely.
    pub async fn pick_file(&self, user_id: &str, bytes: Vec<u8>, mime: &str) -> Result<PickOutcome> {
        {
            let session = self.session.lock().await;
            if !session.can_start() {
                return Ok(PickOutcome::AlreadyActive);
            }
        }

        let decision = self.evaluate_gate(user_id).await?;
        if !decision.has_access {
            info!("file capture denied for {user_id}: {:?}", decision.reason);
            return Ok(PickOutcome::Denied(decision));
        }

        if let Err(err) = raster::validate_picked_file(bytes.len(), mime) {
            warn!("picked file rejected: {err}");
            let mut session = self.session.lock().await;
            session.fail(err.to_string());
            return Ok(PickOutcome::Rejected(err.to_string()));
        }

        let mut session = self.session.lock().await;
        if !session.can_start() {
            return Ok(PickOutcome::AlreadyActive);
        }
        session.begin_from_file(
            Uuid::new_v4().to_string(),
            bytes,
            mime.to_string(),
            decision.reason,
            Utc::now(),
        );
        Ok(PickOutcome::Captured)
    }

    /// `DeviceActive → Captured`: grab the current frame, apply the
    /// session's brightness/contrast adjustments offscreen, and release
    /// the device handle unconditionally.
    pub async fn snapshot(&self) -> Result<SnapshotOutcome> {
        let Some(acquired) = self.active_device.lock().await.take() else {
            return Ok(SnapshotOutcome::NotActive);
        };

        let settings = {
            let session = self.session.lock().await;
            if session.phase != CapturePhase::DeviceActive {
                // Session moved on while we held the guard; the take()
                // above plus guard drop below still releases the handle.
                return Ok(SnapshotOutcome::NotActive);
            }
            session.settings.clone()
        };

        let transformed = tokio::task::spawn_blocking(move || {
            let mut acquired = acquired;
            let frame = acquired.frame(&settings);
            acquired.release();
            frame
                .map_err(anyhow::Error::from)
                .and_then(|frame| raster::apply_adjustments(frame, &settings))
        })
        .await
        .context("snapshot task join failed")?;

        let mut session = self.session.lock().await;
        match transformed {
            Ok(frame) => {
                session.captured(SourceImage::Frame(frame));
                Ok(SnapshotOutcome::Captured)
            }
            Err(err) => {
                warn!("snapshot failed: {err:#}");
                let reason = format!("snapshot failed: {err}");
                session.fail(reason.clone());
                Ok(SnapshotOutcome::Failed(reason))
            }
        }
    }

    /// Keyboard-shortcut channel for the snapshot control. Fires the
    /// same transition as the on-screen control, debounced to once per
    /// animation frame.
    pub async fn shortcut_snapshot(&self) -> Result<SnapshotOutcome> {
        let now = Instant::now();
        {
            let mut last = self.last_snapshot_trigger.lock().unwrap();
            if debounced(*last, now) {
                return Ok(SnapshotOutcome::Debounced);
            }
            *last = Some(now);
        }
        self.snapshot().await
    }

    /// `Captured → Idle`, discarding the raster.
    pub async fn retake(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        if session.phase != CapturePhase::Captured {
            return Ok(false);
        }
        session.retake();
        Ok(true)
    }

    /// `Captured → Confirmed` ("use photo").
    pub async fn confirm(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        if session.phase != CapturePhase::Captured {
            return Ok(false);
        }
        session.confirm();
        Ok(true)
    }

    /// Cancel the attempt. Accepted in any phase before `Submitting`;
    /// once submission has started the attempt runs to a terminal phase
    /// on its own. Returns whether anything was cancelled.
    pub async fn cancel(&self) -> Result<bool> {
        {
            let session = self.session.lock().await;
            if session.phase == CapturePhase::Submitting {
                info!("cancel ignored: submission already in flight");
                return Ok(false);
            }
        }

        if let Some(acquired) = self.active_device.lock().await.take() {
            tokio::task::spawn_blocking(move || {
                let mut acquired = acquired;
                acquired.release();
            })
            .await
            .context("device release task join failed")?;
        }

        let mut session = self.session.lock().await;
        if session.phase == CapturePhase::Idle {
            return Ok(false);
        }
        session.reset();
        Ok(true)
    }

    /// `Confirmed → Submitting → {Completed, Queued, Failed}`.
    pub async fn submit(&self, user_id: &str) -> Result<SubmitOutcome> {
        let (source, counts_against_quota) = {
            let mut session = self.session.lock().await;
            if session.phase != CapturePhase::Confirmed {
                return Err(anyhow!("no confirmed capture to submit"));
            }
            let counts = session.access_reason == Some(AccessReason::FreeLimit);
            let Some(source) = session.begin_submitting() else {
                session.fail("capture source missing at submit time");
                return Ok(SubmitOutcome::Failed {
                    reason: "capture source missing at submit time".into(),
                });
            };
            (source, counts)
        };

        let encoded = tokio::task::spawn_blocking(move || raster::encode_jpeg(&source))
            .await
            .context("encode task join failed")?;

        let image_jpeg = match encoded {
            Ok(jpeg) => jpeg,
            Err(err) => {
                let reason = format!("blob re-encoding failed: {err}");
                warn!("{reason}");
                self.session.lock().await.fail(reason.clone());
                return Ok(SubmitOutcome::Failed { reason });
            }
        };

        let online = *self.online_rx.borrow();
        let outcome = self
            .submitter
            .submit(user_id, image_jpeg, counts_against_quota, online)
            .await?;

        let mut session = self.session.lock().await;
        match &outcome {
            SubmitOutcome::Completed(_) => session.complete(),
            SubmitOutcome::Queued { .. } => session.queued(),
            SubmitOutcome::Failed { reason } => session.fail(reason.clone()),
        }
        Ok(outcome)
    }

    /// Transient tap-to-focus affordance; only meaningful while the
    /// device is live, and expires on its own.
    pub async fn tap_focus(&self, x: f32, y: f32) {
        let mut session = self.session.lock().await;
        if session.phase == CapturePhase::DeviceActive {
            session.set_focus(FocusHint::new(x, y), Instant::now());
        }
    }

    pub async fn focus_hint(&self) -> Option<FocusHint> {
        self.session.lock().await.focus_hint_at(Instant::now())
    }

    async fn evaluate_gate(&self, user_id: &str) -> Result<FeatureAccessDecision> {
        let accounts = Arc::clone(&self.accounts);
        let user = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            let tier = match accounts.tier(&user) {
                Ok(tier) => tier,
                Err(err) => {
                    warn!("tier lookup failed for {user}, treating as no subscription: {err}");
                    None
                }
            };
            let usage = match accounts.usage(&user) {
                Ok(usage) => usage,
                Err(err) => {
                    warn!("usage lookup failed for {user}, assuming fresh allowance: {err}");
                    UsageSnapshot::default()
                }
            };
            check_access(FeatureKind::Identification, tier, &usage)
        })
        .await
        .context("gate evaluation task join failed")
    }
}

fn debounced(last: Option<Instant>, now: Instant) -> bool {
    matches!(last, Some(prev) if now.duration_since(prev) < SNAPSHOT_DEBOUNCE)
}
