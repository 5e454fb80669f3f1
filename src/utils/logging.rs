//! Conditional logging macros gated by a module-level `ENABLE_LOGS`
//! const, so chatty loop modules (the sync worker in particular) can be
//! silenced wholesale without touching the global filter.
//!
//! ```rust
//! const ENABLE_LOGS: bool = true;
//!
//! use floralens::{log_error, log_info, log_warn};
//!
//! log_info!("drain pass finished");
//! ```

/// Info-level logging, compiled against the calling module's
/// `ENABLE_LOGS` const.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level counterpart of [`log_info!`].
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level counterpart of [`log_info!`].
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
