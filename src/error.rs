use thiserror::Error;

/// Errors from the capture device boundary. Non-fatal: the file-picker
/// path stays available whenever the device path fails.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read device frame: {0}")]
    Frame(String),
}

/// Rejections of picked files before they enter the pipeline.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("file is {actual} bytes, over the {limit} byte limit")]
    TooLarge { actual: usize, limit: usize },
    #[error("unsupported file type '{0}'; expected an image/* MIME type")]
    UnsupportedType(String),
}

/// Remote service failures, classified so the submitter can decide
/// whether a request belongs in the offline queue. Only transient
/// failures justify queuing.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transient remote failure: {0}")]
    Transient(String),
    #[error("permanent remote failure: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Durable store failures. A failed durable write is fatal to the
/// triggering enqueue attempt and must be surfaced to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open durable store: {0}")]
    Open(String),
    #[error("durable write failed: {0}")]
    Write(String),
    #[error("durable read failed: {0}")]
    Read(String),
    #[error("durable store worker is gone")]
    WorkerGone,
}
