//! Named leases with background renewal.
//!
//! A lease is exclusive for at most its duration. While a [`LeaseGuard`] is alive a
//! renewal task pushes the expiry forward every third of the duration; once renewal
//! stops (release, drop, lost lease, dead process) the lease lapses on its own and the
//! next `acquire` or `is_held` from any replica retires it.

mod guard;
mod renewal;

pub use guard::LeaseGuard;

use crate::clock::{Clock, duration_to_ms};
use crate::error::{Result, SyncError};
use crate::identity::HolderIdentity;
use crate::store::StoreHandle;
use jm_core::ids::{HolderId, LockName};
use jm_storage::{
    LeaseAcquireRequest, LeaseAcquireResult, LeaseHistoryRequest, LeaseRenewRequest, LeaseRow,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(LeaseGuard),
    /// Someone else holds an unexpired lease.
    Busy {
        holder_id: String,
        expires_at_ms: i64,
    },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LeaseStatus {
    pub lock_name: String,
    pub held: bool,
    pub holder_id: Option<String>,
    pub acquired_at_ms: Option<i64>,
    pub expires_at_ms: Option<i64>,
}

#[derive(Debug)]
struct HeldLease {
    holder_id: HolderId,
    renewal: CancellationToken,
}

#[derive(Debug)]
struct ManagerInner {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
    identity: HolderIdentity,
    held: Mutex<HashMap<LockName, HeldLease>>,
}

/// Acquires, renews and releases leases for one process.
///
/// Cheap to clone; clones share the set of leases this process holds.
#[derive(Clone, Debug)]
pub struct LeaseManager {
    inner: Arc<ManagerInner>,
}

impl LeaseManager {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>) -> Self {
        Self::with_identity(store, clock, HolderIdentity::detect())
    }

    pub fn with_identity(
        store: StoreHandle,
        clock: Arc<dyn Clock>,
        identity: HolderIdentity,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                clock,
                identity,
                held: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn identity(&self) -> &HolderIdentity {
        &self.inner.identity
    }

    pub(crate) fn store(&self) -> &StoreHandle {
        &self.inner.store
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Tries to take `lock_name` for `duration`. Contention is an `Ok(Busy)`; only
    /// store failures are errors.
    pub async fn acquire(&self, lock_name: &LockName, duration: Duration) -> Result<AcquireOutcome> {
        let duration_ms = positive_ms(duration)?;
        let now_ms = self.now_ms();
        let holder_id = self.inner.identity.next_holder_id(now_ms)?;

        let request = LeaseAcquireRequest {
            lock_name: lock_name.clone(),
            holder_id: holder_id.clone(),
            duration_ms,
        };
        let result = self
            .inner
            .store
            .call(move |store| store.lease_acquire(request, now_ms))
            .await?;

        match result {
            LeaseAcquireResult::Held(current) => {
                tracing::info!(
                    lock_name = %lock_name,
                    holder_id = %current.holder_id,
                    expires_at_ms = current.expires_at_ms,
                    "lease busy"
                );
                Ok(AcquireOutcome::Busy {
                    holder_id: current.holder_id,
                    expires_at_ms: current.expires_at_ms,
                })
            }
            LeaseAcquireResult::Acquired(lease) => {
                tracing::info!(
                    lock_name = %lock_name,
                    holder_id = %holder_id,
                    expires_at_ms = lease.expires_at_ms,
                    "lease acquired"
                );
                let renewal = CancellationToken::new();
                let lost = Arc::new(AtomicBool::new(false));
                self.track(lock_name.clone(), holder_id.clone(), renewal.clone());
                renewal::spawn(
                    self.clone(),
                    lock_name.clone(),
                    holder_id.clone(),
                    duration,
                    renewal.clone(),
                    Arc::clone(&lost),
                );
                Ok(AcquireOutcome::Acquired(LeaseGuard::new(
                    self.clone(),
                    lock_name.clone(),
                    holder_id,
                    lease.acquired_at_ms,
                    renewal,
                    lost,
                )))
            }
        }
    }

    /// Pushes the expiry of a lease this caller owns. `false` means the lease is lost.
    pub async fn renew(
        &self,
        lock_name: &LockName,
        holder_id: &HolderId,
        duration: Duration,
    ) -> Result<bool> {
        let duration_ms = positive_ms(duration)?;
        let now_ms = self.now_ms();
        let request = LeaseRenewRequest {
            lock_name: lock_name.clone(),
            holder_id: holder_id.clone(),
            duration_ms,
        };
        let renewed = self
            .inner
            .store
            .call(move |store| store.lease_renew(request, now_ms))
            .await?;
        Ok(renewed.is_some())
    }

    /// Idempotent release. Stops this process's renewal of the lease either way.
    pub async fn release(&self, lock_name: &LockName, holder_id: &HolderId) -> Result<bool> {
        self.forget(lock_name, holder_id);

        let now_ms = self.now_ms();
        let (name, holder) = (lock_name.clone(), holder_id.clone());
        let released = self
            .inner
            .store
            .call(move |store| store.lease_release(&name, &holder, now_ms))
            .await?;

        if released {
            tracing::info!(lock_name = %lock_name, holder_id = %holder_id, "lease released");
        } else {
            tracing::debug!(
                lock_name = %lock_name,
                holder_id = %holder_id,
                "release was a no-op"
            );
        }
        Ok(released)
    }

    pub async fn is_held(&self, lock_name: &LockName) -> Result<LeaseStatus> {
        let now_ms = self.now_ms();
        let name = lock_name.clone();
        let current = self
            .inner
            .store
            .call(move |store| store.lease_inspect(&name, now_ms))
            .await?;

        Ok(match current {
            Some(lease) => LeaseStatus {
                lock_name: lock_name.to_string(),
                held: true,
                holder_id: Some(lease.holder_id),
                acquired_at_ms: Some(lease.acquired_at_ms),
                expires_at_ms: Some(lease.expires_at_ms),
            },
            None => LeaseStatus {
                lock_name: lock_name.to_string(),
                held: false,
                holder_id: None,
                acquired_at_ms: None,
                expires_at_ms: None,
            },
        })
    }

    /// Lease rows newest first, active and retired alike.
    pub async fn history(&self, lock_name: Option<&LockName>, limit: usize) -> Result<Vec<LeaseRow>> {
        let request = LeaseHistoryRequest {
            lock_name: lock_name.cloned(),
            limit,
        };
        let result = self
            .inner
            .store
            .call(move |store| store.lease_history(request))
            .await?;
        Ok(result.leases)
    }

    /// Locks this process currently believes it holds.
    pub fn held_locks(&self) -> Vec<(LockName, HolderId)> {
        let held = self.inner.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = held
            .iter()
            .map(|(name, lease)| (name.clone(), lease.holder_id.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Releases every lease this process holds. Returns how many were actually released.
    pub async fn release_all(&self) -> usize {
        let mut released = 0;
        for (lock_name, holder_id) in self.held_locks() {
            match self.release(&lock_name, &holder_id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(err) => tracing::warn!(
                    lock_name = %lock_name,
                    holder_id = %holder_id,
                    error = %err,
                    "release during shutdown failed; lease will lapse at expiry"
                ),
            }
        }
        released
    }

    /// Releases everything this process holds once `shutdown` is cancelled.
    ///
    /// The owning supervisor decides what triggers `shutdown` (signals, orchestrator
    /// hooks); this crate never installs signal handlers on its own.
    pub fn release_on_shutdown(&self, shutdown: CancellationToken) -> JoinHandle<usize> {
        let manager = self.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            let released = manager.release_all().await;
            tracing::info!(released, "released held leases on shutdown");
            released
        })
    }

    fn track(&self, lock_name: LockName, holder_id: HolderId, renewal: CancellationToken) {
        let mut held = self.inner.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = held.insert(lock_name, HeldLease { holder_id, renewal }) {
            previous.renewal.cancel();
        }
    }

    /// Stops renewal and drops bookkeeping for `(lock_name, holder_id)` if it is ours.
    pub(crate) fn forget(&self, lock_name: &LockName, holder_id: &HolderId) {
        let mut held = self.inner.held.lock().unwrap_or_else(PoisonError::into_inner);
        let ours = held
            .get(lock_name)
            .is_some_and(|lease| &lease.holder_id == holder_id);
        if !ours {
            return;
        }
        if let Some(lease) = held.remove(lock_name) {
            lease.renewal.cancel();
        }
    }
}

fn positive_ms(duration: Duration) -> Result<i64> {
    let ms = duration_to_ms(duration);
    if ms <= 0 {
        return Err(SyncError::InvalidInput(
            "lease duration must be at least 1ms".to_string(),
        ));
    }
    Ok(ms)
}
