//! Offline-first plant identification capture pipeline.
//!
//! The crate covers the capture-to-identification flow of the product:
//! a capture state machine fed by a live device or the file picker, a
//! tier/usage feature-access gate in front of it, an identification
//! submitter that classifies remote failures, and a durable offline
//! queue reconciled against the remote service whenever connectivity
//! allows. Hardware, storage and remote services sit behind capability
//! traits ([`capture::CaptureDevice`], [`queue::DurableStore`],
//! [`remote::IdentificationService`], [`remote::AccountService`]) so
//! the whole pipeline runs against in-process fakes in tests and in the
//! demo binary.

pub mod access;
pub mod capture;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod submit;
pub mod usage;
mod utils;

pub use access::{
    check_access, AccessReason, FeatureAccessDecision, FeatureKind, Tier, UsageSnapshot,
    MONTHLY_FREE_LIMIT,
};
pub use capture::{
    CaptureController, CapturePhase, CaptureSnapshot, PickOutcome, SnapshotOutcome, StartOutcome,
};
pub use config::{ConfigStore, PipelineConfig};
pub use models::{IdentificationResult, PendingIdentification};
pub use queue::{DrainReport, OfflineQueue, SyncController};
pub use submit::{IdentificationSubmitter, SubmitOutcome};
pub use usage::UsageReconciler;
