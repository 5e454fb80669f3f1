use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured result returned by the remote identification service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationResult {
    pub species: String,
    /// Confidence score in [0, 1].
    pub confidence: f32,
    pub description: String,
    pub care_instructions: Vec<String>,
    pub characteristics: Vec<String>,
}

impl IdentificationResult {
    /// One-line summary stored on the durable record once it syncs.
    pub fn summary(&self) -> String {
        format!("{} ({:.0}%)", self.species, self.confidence * 100.0)
    }
}

/// Durable record for an identification attempt that could not complete
/// synchronously. Owned by the offline queue once enqueued; kept as
/// local history after syncing, never deleted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingIdentification {
    pub id: String,
    pub user_id: String,
    #[serde(skip)]
    pub image_jpeg: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub synced: bool,
    pub result_summary: Option<String>,
    /// True when the originating attempt was granted under the free-tier
    /// allowance. Usage recording is deferred until the record syncs so
    /// attempts that never complete are not counted.
    pub counts_against_quota: bool,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl PendingIdentification {
    pub fn new(
        id: String,
        user_id: String,
        image_jpeg: Vec<u8>,
        created_at: DateTime<Utc>,
        counts_against_quota: bool,
    ) -> Self {
        Self {
            id,
            user_id,
            image_jpeg,
            created_at,
            synced: false,
            result_summary: None,
            counts_against_quota,
            attempts: 0,
            last_attempt_at: None,
        }
    }
}
