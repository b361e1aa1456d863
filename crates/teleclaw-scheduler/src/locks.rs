//! Account lock manager — at most one in-flight action per account,
//! process-wide. Acquisition never waits: a busy account means skip.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct AccountLocks {
    held: Mutex<HashSet<String>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `account_id` if nobody holds it.
    pub fn try_acquire(&self, account_id: &str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(account_id.to_string())
    }

    /// Release the lock. Releasing a free account is a no-op.
    pub fn release(&self, account_id: &str) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(account_id);
    }

    pub fn is_held(&self, account_id: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(account_id)
    }

    /// Number of accounts currently locked.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Acquire and return a guard that releases on drop.
    pub fn try_lease(self: &Arc<Self>, account_id: &str) -> Option<AccountLease> {
        if self.try_acquire(account_id) {
            Some(AccountLease {
                locks: Arc::clone(self),
                account_id: account_id.to_string(),
            })
        } else {
            None
        }
    }
}

/// Holds an account lock until dropped, including on early return or panic.
#[derive(Debug)]
pub struct AccountLease {
    locks: Arc<AccountLocks>,
    account_id: String,
}

impl AccountLease {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl Drop for AccountLease {
    fn drop(&mut self) {
        self.locks.release(&self.account_id);
    }
}
