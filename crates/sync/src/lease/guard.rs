use super::LeaseManager;
use crate::error::Result;
use jm_core::ids::{HolderId, LockName};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Proof of holding a lease. Renewal runs for as long as the guard lives.
///
/// Call [`LeaseGuard::release`] on every normal exit path. If the guard is dropped
/// without it (panic, cancelled future) the drop still stops renewal and makes a
/// best-effort release; failing that, the lease lapses at its expiry.
#[derive(Debug)]
pub struct LeaseGuard {
    manager: LeaseManager,
    lock_name: LockName,
    holder_id: HolderId,
    acquired_at_ms: i64,
    renewal: CancellationToken,
    lost: Arc<AtomicBool>,
    released: bool,
}

impl LeaseGuard {
    pub(super) fn new(
        manager: LeaseManager,
        lock_name: LockName,
        holder_id: HolderId,
        acquired_at_ms: i64,
        renewal: CancellationToken,
        lost: Arc<AtomicBool>,
    ) -> Self {
        Self {
            manager,
            lock_name,
            holder_id,
            acquired_at_ms,
            renewal,
            lost,
            released: false,
        }
    }

    pub fn lock_name(&self) -> &LockName {
        &self.lock_name
    }

    pub fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    pub fn acquired_at_ms(&self) -> i64 {
        self.acquired_at_ms
    }

    /// True once renewal found the lease gone. Work still running is no longer exclusive.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Stops renewal and releases the lease. `Ok(false)` if it was already gone.
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.renewal.cancel();
        self.manager.release(&self.lock_name, &self.holder_id).await
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.renewal.cancel();
        self.manager.forget(&self.lock_name, &self.holder_id);

        let store = self.manager.store().clone();
        let now_ms = self.manager.now_ms();
        let lock_name = self.lock_name.clone();
        let holder_id = self.holder_id.clone();
        tracing::warn!(
            lock_name = %lock_name,
            holder_id = %holder_id,
            "lease guard dropped without release; releasing in background"
        );

        let release = move || {
            match store.call_blocking(|s| s.lease_release(&lock_name, &holder_id, now_ms)) {
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    lock_name = %lock_name,
                    holder_id = %holder_id,
                    error = %err,
                    "background release failed; lease will lapse at expiry"
                ),
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(release);
            }
            Err(_) => release(),
        }
    }
}
