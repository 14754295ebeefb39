//! Per-identifier run locks.
//!
//! At most one run per identifier is in flight. Contention is reported to
//! the caller, never queued. A [`RunGuard`] releases its lock when dropped,
//! which includes unwinding out of a panicking worker.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    // The set is only touched in short critical sections that cannot panic,
    // so a poisoned lock still holds consistent data.
    fn held(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the lock for `identifier`, or `None` if a run already holds it.
    pub fn try_acquire(&self, identifier: &str) -> Option<RunGuard> {
        if !self.held().insert(identifier.to_string()) {
            return None;
        }
        Some(RunGuard {
            locks: self.clone(),
            identifier: identifier.to_string(),
        })
    }

    pub fn is_held(&self, identifier: &str) -> bool {
        self.held().contains(identifier)
    }

    pub fn held_count(&self) -> usize {
        self.held().len()
    }
}

/// Proof of holding an identifier's run lock.
#[derive(Debug)]
pub struct RunGuard {
    locks: RunLocks,
    identifier: String,
}

impl RunGuard {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.held().remove(&self.identifier);
        tracing::debug!("Released run lock for '{}'", self.identifier);
    }
}
