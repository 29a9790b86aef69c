//! crates/exam_pilot_core/src/locks.rs
//!
//! In-process, per-user write serialization.
//!
//! Each user id maps to its own async mutex. The registry map itself is only
//! locked to look an entry up, never while a request is in flight, so requests
//! for different users never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry size above which idle entries are pruned on lookup.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Default)]
pub struct UserLocks {
    entries: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other request holds `user_id`, then holds it until the guard drops.
    pub async fn acquire(&self, user_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut entries = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if entries.len() > PRUNE_THRESHOLD {
                // Only the registry references an idle entry.
                entries.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            entries.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
