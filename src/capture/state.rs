use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::AccessReason;
use crate::models::{DeviceSettings, FocusHint, SourceImage};

/// Tap-to-focus hints evaporate after this long.
pub const FOCUS_HINT_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CapturePhase {
    Idle,
    DeviceActive,
    Captured,
    Confirmed,
    Submitting,
    Completed,
    Queued,
    Failed,
}

impl Default for CapturePhase {
    fn default() -> Self {
        CapturePhase::Idle
    }
}

impl CapturePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapturePhase::Idle => "Idle",
            CapturePhase::DeviceActive => "DeviceActive",
            CapturePhase::Captured => "Captured",
            CapturePhase::Confirmed => "Confirmed",
            CapturePhase::Submitting => "Submitting",
            CapturePhase::Completed => "Completed",
            CapturePhase::Queued => "Queued",
            CapturePhase::Failed => "Failed",
        }
    }

    /// Terminal phases: the attempt is over and a new session may start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CapturePhase::Completed | CapturePhase::Queued | CapturePhase::Failed
        )
    }
}

/// One user-initiated capture attempt. Owned exclusively by the capture
/// controller; at most one is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub phase: CapturePhase,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub settings: DeviceSettings,
    pub failure_reason: Option<String>,
    /// Reason from the gate decision that admitted this attempt; drives
    /// usage recording on completion.
    pub access_reason: Option<AccessReason>,
    #[serde(skip)]
    pub source: Option<SourceImage>,
    #[serde(skip)]
    focus: Option<(FocusHint, Instant)>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            phase: CapturePhase::Idle,
            session_id: None,
            started_at: None,
            settings: DeviceSettings::default(),
            failure_reason: None,
            access_reason: None,
            source: None,
            focus: None,
        }
    }
}

impl CaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new capture may only start from idle or a terminal phase;
    /// anything else means an attempt is still in flight.
    pub fn can_start(&self) -> bool {
        self.phase == CapturePhase::Idle || self.phase.is_terminal()
    }

    pub fn begin_device(
        &mut self,
        session_id: String,
        settings: DeviceSettings,
        access_reason: AccessReason,
        started_at: DateTime<Utc>,
    ) {
        *self = Self {
            phase: CapturePhase::DeviceActive,
            session_id: Some(session_id),
            started_at: Some(started_at),
            settings: settings.clamped(),
            failure_reason: None,
            access_reason: Some(access_reason),
            source: None,
            focus: None,
        };
    }

    pub fn begin_from_file(
        &mut self,
        session_id: String,
        bytes: Vec<u8>,
        mime: String,
        access_reason: AccessReason,
        started_at: DateTime<Utc>,
    ) {
        *self = Self {
            phase: CapturePhase::Captured,
            session_id: Some(session_id),
            started_at: Some(started_at),
            settings: DeviceSettings::default(),
            failure_reason: None,
            access_reason: Some(access_reason),
            source: Some(SourceImage::File { bytes, mime }),
            focus: None,
        };
    }

    pub fn captured(&mut self, source: SourceImage) {
        self.phase = CapturePhase::Captured;
        self.source = Some(source);
        self.focus = None;
    }

    /// Discard the raster and return to idle. No side effects.
    pub fn retake(&mut self) {
        *self = Self::default();
    }

    pub fn confirm(&mut self) {
        self.phase = CapturePhase::Confirmed;
    }

    /// Move into `Submitting`, handing ownership of the finalized source
    /// to the caller. Cancellation is no longer possible past this point.
    pub fn begin_submitting(&mut self) -> Option<SourceImage> {
        self.phase = CapturePhase::Submitting;
        self.focus = None;
        self.source.take()
    }

    pub fn complete(&mut self) {
        self.phase = CapturePhase::Completed;
    }

    pub fn queued(&mut self) {
        self.phase = CapturePhase::Queued;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.phase = CapturePhase::Failed;
        self.failure_reason = Some(reason.into());
        self.source = None;
        self.focus = None;
    }

    /// Reset to idle, e.g. on cancellation before `Submitting`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_focus(&mut self, hint: FocusHint, now: Instant) {
        self.focus = Some((hint, now));
    }

    /// The current focus hint, if one was set within the last two
    /// seconds. Expired hints read as `None`.
    pub fn focus_hint_at(&self, now: Instant) -> Option<FocusHint> {
        match self.focus {
            Some((hint, set_at)) if now.duration_since(set_at) < FOCUS_HINT_TTL => Some(hint),
            _ => None,
        }
    }
}
