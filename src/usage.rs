use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::remote::AccountService;

/// Best-effort, eventually consistent usage accounting.
///
/// Called only after an identification actually completed under a
/// free-tier allowance: synchronously completed attempts at completion
/// time, queued attempts at the moment they sync. A failed call never
/// rolls back or blocks the identification result; it is logged,
/// remembered, and retried opportunistically from the sync worker tick.
pub struct UsageReconciler {
    accounts: Arc<dyn AccountService>,
    pending: Mutex<Vec<String>>,
}

impl UsageReconciler {
    pub fn new(accounts: Arc<dyn AccountService>) -> Self {
        Self {
            accounts,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub async fn record_usage(&self, user_id: &str) {
        if !self.attempt(user_id).await {
            self.pending.lock().unwrap().push(user_id.to_string());
        }
    }

    /// Retry every remembered failure once. Entries that fail again are
    /// kept for the next opportunity.
    pub async fn retry_pending(&self) {
        let queued = std::mem::take(&mut *self.pending.lock().unwrap());
        if queued.is_empty() {
            return;
        }

        info!("retrying {} deferred usage increments", queued.len());
        for user_id in queued {
            if !self.attempt(&user_id).await {
                self.pending.lock().unwrap().push(user_id);
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    async fn attempt(&self, user_id: &str) -> bool {
        let accounts = Arc::clone(&self.accounts);
        let user = user_id.to_string();
        match tokio::task::spawn_blocking(move || accounts.increment_usage(&user)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!("usage increment failed for {user_id}: {err}");
                false
            }
            Err(err) => {
                warn!("usage increment task join failed for {user_id}: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::access::{Tier, UsageSnapshot};
    use crate::error::RemoteError;

    #[derive(Default)]
    struct FlakyAccounts {
        offline: AtomicBool,
        increments: AtomicU32,
    }

    impl AccountService for FlakyAccounts {
        fn tier(&self, _user_id: &str) -> Result<Option<Tier>, RemoteError> {
            Ok(Some(Tier::Free))
        }

        fn usage(&self, _user_id: &str) -> Result<UsageSnapshot, RemoteError> {
            Ok(UsageSnapshot::default())
        }

        fn increment_usage(&self, _user_id: &str) -> Result<(), RemoteError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(RemoteError::Transient("offline".into()));
            }
            self.increments.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_increments_are_remembered_and_retried() {
        let accounts = Arc::new(FlakyAccounts::default());
        let reconciler = UsageReconciler::new(accounts.clone());

        accounts.offline.store(true, Ordering::SeqCst);
        reconciler.record_usage("user-1").await;
        assert_eq!(reconciler.pending_count(), 1);
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 0);

        accounts.offline.store(false, Ordering::SeqCst);
        reconciler.retry_pending().await;
        assert_eq!(reconciler.pending_count(), 0);
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_increment_leaves_nothing_pending() {
        let accounts = Arc::new(FlakyAccounts::default());
        let reconciler = UsageReconciler::new(accounts.clone());

        reconciler.record_usage("user-1").await;
        assert_eq!(reconciler.pending_count(), 0);
        assert_eq!(accounts.increments.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_failing_again_stay_pending() {
        let accounts = Arc::new(FlakyAccounts::default());
        let reconciler = UsageReconciler::new(accounts.clone());

        accounts.offline.store(true, Ordering::SeqCst);
        reconciler.record_usage("user-1").await;
        reconciler.retry_pending().await;
        assert_eq!(reconciler.pending_count(), 1);
    }
}
