use super::LeaseManager;
use jm_core::ids::{HolderId, LockName};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Renewals per lease duration. Three leaves room for one missed tick before expiry.
const RENEWALS_PER_LEASE: u32 = 3;
const MIN_RENEWAL_PERIOD: Duration = Duration::from_millis(10);

pub(crate) fn renewal_period(duration: Duration) -> Duration {
    (duration / RENEWALS_PER_LEASE).max(MIN_RENEWAL_PERIOD)
}

pub(super) fn spawn(
    manager: LeaseManager,
    lock_name: LockName,
    holder_id: HolderId,
    duration: Duration,
    cancel: CancellationToken,
    lost: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = renewal_period(duration);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match manager.renew(&lock_name, &holder_id, duration).await {
                Ok(true) => {
                    tracing::debug!(lock_name = %lock_name, holder_id = %holder_id, "lease renewed");
                }
                Ok(false) if cancel.is_cancelled() => break,
                Ok(false) => {
                    lost.store(true, Ordering::SeqCst);
                    tracing::warn!(
                        lock_name = %lock_name,
                        holder_id = %holder_id,
                        "lease lost; protected work is no longer exclusive"
                    );
                    manager.forget(&lock_name, &holder_id);
                    break;
                }
                // Keep ticking either way: the lease is still ours until it expires.
                Err(err) if err.is_transient() => {
                    tracing::warn!(
                        lock_name = %lock_name,
                        holder_id = %holder_id,
                        error = %err,
                        "lease renewal failed; retrying next tick"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        lock_name = %lock_name,
                        holder_id = %holder_id,
                        error = %err,
                        "lease renewal failed"
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_is_a_third_of_the_lease() {
        assert_eq!(
            renewal_period(Duration::from_secs(30 * 60)),
            Duration::from_secs(10 * 60)
        );
        assert_eq!(
            renewal_period(Duration::from_millis(3)),
            MIN_RENEWAL_PERIOD
        );
    }
}
