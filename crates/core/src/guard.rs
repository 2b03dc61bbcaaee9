use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::ConversationId;

/// Tracks which conversations have a send in flight.
///
/// Only one send may run per conversation. A second one is refused rather
/// than queued, since its transcript would be stale by the time it ran.
#[derive(Default)]
pub struct ConversationLocks {
    locks: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

/// Marks a conversation as busy until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ConversationLocks {
    /// Marks the conversation busy, or returns `None` if it already is.
    pub fn try_acquire(&self, id: &ConversationId) -> Option<InFlightGuard> {
        let lock = {
            let mut locks =
                self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        let guard = lock.try_lock_owned().ok()?;
        Some(InFlightGuard { _guard: guard })
    }

    /// Returns `true` if a send is in flight for the conversation.
    pub fn is_busy(&self, id: &ConversationId) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}
