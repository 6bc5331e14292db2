//! Single-writer guard for sync operations

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// At most one sync operation holds this at a time. Dropping the returned
/// guard releases it, whichever way the operation ends.
#[derive(Debug, Clone, Default)]
pub struct BusyGuard {
    lock: Arc<Mutex<()>>,
}

impl BusyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another operation is running
    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        self.lock.clone().try_lock_owned().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let guard = BusyGuard::new();
        let held = guard.try_acquire().unwrap();
        assert!(guard.is_busy());
        assert!(guard.clone().try_acquire().is_none());

        drop(held);
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }
}
