//! Keyed async mutex serializing mutations of one account.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct AccountLocks {
    locks: Arc<LockMap>,
}

/// Exclusive access to one account. Dropping it releases the lock and
/// forgets the account's mutex once nobody else holds or waits on it.
pub struct AccountLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    account_no: String,
}

impl Drop for AccountLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the mutex, so the map's entry is
        // the only reference left exactly when the account is idle.
        self.locks
            .remove_if(&self.account_no, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `account_no`. The lock is released when
    /// the guard is dropped.
    pub async fn lock(&self, account_no: &str) -> AccountLockGuard {
        let mutex = self
            .locks
            .entry(account_no.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        AccountLockGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            account_no: account_no.to_string(),
        }
    }
}
