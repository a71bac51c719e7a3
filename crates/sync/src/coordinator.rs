//! Throttle gate, lease and ledger composed into one run policy.
//!
//! ```text
//! Idle -> Throttled                      (cooling down, nothing touched)
//! Idle -> Busy                           (lease held elsewhere)
//! Idle -> Running -> Completed | Failed  (lease + ledger entry, always released)
//! ```

use crate::error::Result;
use crate::lease::{AcquireOutcome, LeaseManager};
use crate::ledger::RunLedger;
use crate::lock_name::derive_lock_name;
use futures::FutureExt;
use jm_core::ids::RunKind;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPolicy {
    pub minimum_interval: Duration,
    pub lease_duration: Duration,
    pub bypass_throttle: bool,
}

impl RunPolicy {
    pub fn from_minutes(minimum_interval_minutes: u64, lease_duration_minutes: u64) -> Self {
        Self {
            minimum_interval: minutes(minimum_interval_minutes),
            lease_duration: minutes(lease_duration_minutes),
            bypass_throttle: false,
        }
    }

    pub fn bypass_throttle(mut self, bypass: bool) -> Self {
        self.bypass_throttle = bypass;
        self
    }
}

/// What happened to one `run` call. Every variant is an expected outcome; only a
/// store that cannot be reached turns into an `Err`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Throttled { minutes_remaining: i64 },
    Busy { holder_id: String },
    Completed { run_id: i64, result: Value },
    Failed { run_id: i64, error: String },
}

impl SyncOutcome {
    /// HTTP-style status class a route layer can map this outcome onto.
    pub fn status_hint(&self) -> u16 {
        match self {
            SyncOutcome::Throttled { .. } => 429,
            SyncOutcome::Busy { .. } => 409,
            SyncOutcome::Completed { .. } => 200,
            SyncOutcome::Failed { .. } => 500,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }
}

#[derive(Clone, Debug)]
pub struct SyncCoordinator {
    leases: LeaseManager,
    ledger: RunLedger,
}

impl SyncCoordinator {
    pub fn new(leases: LeaseManager, ledger: RunLedger) -> Self {
        Self { leases, ledger }
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Runs `work` for `(kind, scope)` if the throttle allows and nobody else holds the lock.
    ///
    /// Errors and panics from `work` are recorded as a failed run and returned as
    /// [`SyncOutcome::Failed`]; the lease is released on every path.
    pub async fn run<F, Fut, E>(
        &self,
        kind: &RunKind,
        scope: &Value,
        policy: &RunPolicy,
        work: F,
    ) -> Result<SyncOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
        E: Display,
    {
        if let Some(throttled) = self.throttle(kind, policy).await? {
            return Ok(throttled);
        }

        let lock_name = derive_lock_name(kind, scope)?;
        let guard = match self.leases.acquire(&lock_name, policy.lease_duration).await? {
            AcquireOutcome::Acquired(guard) => guard,
            AcquireOutcome::Busy { holder_id, .. } => {
                return Ok(SyncOutcome::Busy { holder_id });
            }
        };

        // A run of the same kind may have completed between the first check and the acquire.
        match self.throttle(kind, policy).await {
            Ok(None) => {}
            Ok(Some(throttled)) => {
                release_logged(guard).await;
                return Ok(throttled);
            }
            Err(err) => {
                release_logged(guard).await;
                return Err(err);
            }
        }

        let handle = match self.ledger.start_run(kind, scope).await {
            Ok(handle) => handle,
            Err(err) => {
                release_logged(guard).await;
                return Err(err);
            }
        };
        let run_id = handle.id();

        let work_result = AssertUnwindSafe(async move { work().await })
            .catch_unwind()
            .await;
        let work_result = match work_result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.to_string()),
            Err(panic) => Err(format!("work panicked: {}", panic_message(panic.as_ref()))),
        };

        if guard.is_lost() {
            tracing::warn!(
                run_id,
                lock_name = %lock_name,
                "lease was lost while work ran; exclusivity was not guaranteed"
            );
        }

        let outcome = match work_result {
            Ok(result) => {
                if let Err(err) = self.ledger.finish(handle, &result).await {
                    tracing::error!(run_id, error = %err, "could not record completed run");
                }
                SyncOutcome::Completed { run_id, result }
            }
            Err(error) => {
                if let Err(err) = self.ledger.fail(handle, &error).await {
                    tracing::error!(run_id, error = %err, "could not record failed run");
                }
                SyncOutcome::Failed { run_id, error }
            }
        };

        release_logged(guard).await;
        Ok(outcome)
    }

    async fn throttle(&self, kind: &RunKind, policy: &RunPolicy) -> Result<Option<SyncOutcome>> {
        if policy.bypass_throttle {
            return Ok(None);
        }
        let decision = self.ledger.can_run(kind, policy.minimum_interval).await?;
        if decision.allowed {
            return Ok(None);
        }
        tracing::info!(
            kind = %kind,
            minutes_remaining = decision.minutes_remaining,
            "run throttled"
        );
        Ok(Some(SyncOutcome::Throttled {
            minutes_remaining: decision.minutes_remaining,
        }))
    }
}

async fn release_logged(guard: crate::lease::LeaseGuard) {
    let lock_name = guard.lock_name().clone();
    if let Err(err) = guard.release().await {
        tracing::warn!(
            lock_name = %lock_name,
            error = %err,
            "lease release failed; it will lapse at expiry"
        );
    }
}

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = panic.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
