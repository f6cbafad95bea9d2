//! Per-agreement mutual exclusion
//!
//! Workers take the lock for an agreement id before any step that mutates
//! that agreement. Waiters are served in FIFO order per id. The manager only
//! guarantees exclusivity; it knows nothing about agreement state.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Grants exclusive access to one agreement id at a time
#[derive(Debug, Clone, Default)]
pub struct AgreementLockManager {
    locks: Arc<LockTable>,
}

impl AgreementLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the agreement is free, then hold it until the guard drops
    pub async fn acquire(&self, agreement_id: &str) -> AgreementLockGuard {
        let lock = self.lock_for(agreement_id);
        let guard = lock.lock_owned().await;
        trace!(agreement_id, "Agreement lock acquired");
        AgreementLockGuard {
            agreement_id: agreement_id.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, agreement_id: &str) -> Option<AgreementLockGuard> {
        let lock = self.lock_for(agreement_id);
        let guard = lock.try_lock_owned().ok()?;
        Some(AgreementLockGuard {
            agreement_id: agreement_id.to_string(),
            guard: Some(guard),
            locks: self.locks.clone(),
        })
    }

    pub fn is_locked(&self, agreement_id: &str) -> bool {
        match self.locks.get(agreement_id) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Number of ids currently held or waited on
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, agreement_id: &str) -> Arc<Mutex<()>> {
        // Cloned under the shard lock so release can count waiters reliably
        self.locks
            .entry(agreement_id.to_string())
            .or_default()
            .clone()
    }
}

/// Held lock on one agreement id; released on drop
#[derive(Debug)]
pub struct AgreementLockGuard {
    agreement_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl AgreementLockGuard {
    pub fn agreement_id(&self) -> &str {
        &self.agreement_id
    }

    /// Release explicitly; same as dropping the guard
    pub fn release(self) {}
}

impl Drop for AgreementLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Forget the entry once no holder or waiter references it
        self.locks
            .remove_if(&self.agreement_id, |_, lock| Arc::strong_count(lock) == 1);
        trace!(agreement_id = %self.agreement_id, "Agreement lock released");
    }
}
