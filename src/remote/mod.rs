//! Remote capability boundaries.
//!
//! The pipeline never talks to the network directly; it goes through
//! these traits so tests and the demo run against in-process fakes. The
//! blocking HTTP implementations live in [`http`] and are driven through
//! `spawn_blocking` from async contexts.

mod http;

pub use http::{HttpAccountService, HttpIdentificationService};

use crate::access::{Tier, UsageSnapshot};
use crate::error::RemoteError;
use crate::models::IdentificationResult;

/// Opaque remote species-identification capability.
pub trait IdentificationService: Send + Sync {
    fn identify(
        &self,
        image_jpeg: &[u8],
        user_id: &str,
    ) -> Result<IdentificationResult, RemoteError>;
}

/// Remote usage/subscription service.
pub trait AccountService: Send + Sync {
    /// The user's subscription tier; `None` when the caller has no
    /// resolvable subscription (anonymous or unknown user).
    fn tier(&self, user_id: &str) -> Result<Option<Tier>, RemoteError>;
    fn usage(&self, user_id: &str) -> Result<UsageSnapshot, RemoteError>;
    fn increment_usage(&self, user_id: &str) -> Result<(), RemoteError>;
}
