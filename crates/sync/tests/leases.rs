#![forbid(unsafe_code)]

use jm_core::ids::{HolderId, LockName};
use jm_sync::{
    AcquireOutcome, Clock, HolderIdentity, LeaseGuard, LeaseManager, ManualClock, StoreHandle,
    SyncError, SystemClock,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const T0: i64 = 1_700_000_000_000;
const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("jm_sync_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn lock(name: &str) -> LockName {
    LockName::try_new(name).expect("lock name")
}

/// One replica: its own connection, identity and clock view.
fn pod(dir: &Path, host: &str, clock: Arc<dyn Clock>) -> LeaseManager {
    let store = StoreHandle::open(dir, Duration::from_secs(5)).expect("open store");
    LeaseManager::with_identity(store, clock, HolderIdentity::new(host, 1))
}

fn expect_acquired(outcome: AcquireOutcome) -> LeaseGuard {
    match outcome {
        AcquireOutcome::Acquired(guard) => guard,
        AcquireOutcome::Busy { holder_id, .. } => panic!("expected lease, held by {holder_id}"),
    }
}

async fn wait_until_free(manager: &LeaseManager, name: &LockName) -> bool {
    for _ in 0..100 {
        if !manager.is_held(name).await.expect("is_held").held {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn second_pod_is_told_who_holds_the_lock() {
    let dir = temp_dir("second_pod_busy");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock.clone());
    let y = pod(&dir, "pod-y", clock.clone());
    let name = lock("sync-all");

    let guard = expect_acquired(x.acquire(&name, THIRTY_MINUTES).await.expect("acquire x"));
    assert!(guard.holder_id().as_str().starts_with("pod-x:1:"));

    clock.advance(Duration::from_secs(10 * 60));
    match y.acquire(&name, THIRTY_MINUTES).await.expect("acquire y") {
        AcquireOutcome::Busy {
            holder_id,
            expires_at_ms,
        } => {
            assert_eq!(holder_id, guard.holder_id().as_str());
            assert_eq!(expires_at_ms, T0 + 30 * 60_000);
        }
        AcquireOutcome::Acquired(_) => panic!("two holders for one lock"),
    }

    let status = y.is_held(&name).await.expect("is_held");
    assert!(status.held);
    assert_eq!(status.holder_id.as_deref(), Some(guard.holder_id().as_str()));

    assert!(guard.release().await.expect("release"));
}

#[tokio::test]
async fn expired_lease_is_taken_over_by_another_pod() {
    let dir = temp_dir("expired_takeover");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock.clone());
    let y = pod(&dir, "pod-y", clock.clone());
    let name = lock("sync-all");

    let x_guard = expect_acquired(x.acquire(&name, THIRTY_MINUTES).await.expect("acquire x"));
    let x_holder = x_guard.holder_id().clone();

    // No renewal tick fires in real time; only the simulated clock moves.
    clock.advance(Duration::from_secs(31 * 60));
    assert!(!y.is_held(&name).await.expect("is_held").held);

    let y_guard = expect_acquired(y.acquire(&name, THIRTY_MINUTES).await.expect("acquire y"));
    assert_ne!(y_guard.holder_id(), &x_holder);

    // X releasing late must not disturb Y.
    assert!(!x_guard.release().await.expect("late release"));
    let status = y.is_held(&name).await.expect("is_held");
    assert_eq!(status.holder_id.as_deref(), Some(y_guard.holder_id().as_str()));

    let history = y.history(Some(&name), 10).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].holder_id, x_holder.as_str());
    assert_eq!(history[1].release_reason.as_deref(), Some("expired"));

    assert!(y_guard.release().await.expect("release y"));
}

#[tokio::test]
async fn release_is_idempotent() {
    let dir = temp_dir("release_idempotent");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock);
    let name = lock("sync-project-ABC");

    let guard = expect_acquired(x.acquire(&name, THIRTY_MINUTES).await.expect("acquire"));
    let holder = guard.holder_id().clone();
    assert!(guard.release().await.expect("first release"));
    assert!(!x.release(&name, &holder).await.expect("second release"));
    assert!(x.held_locks().is_empty());

    let stranger = HolderId::try_new("nobody:0:0:000000000000").expect("holder");
    assert!(!x.release(&name, &stranger).await.expect("stranger release"));
    assert!(!x.is_held(&name).await.expect("is_held").held);
}

#[tokio::test]
async fn renew_requires_current_holder() {
    let dir = temp_dir("renew_holder");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock.clone());
    let name = lock("sync-all");

    let guard = expect_acquired(x.acquire(&name, THIRTY_MINUTES).await.expect("acquire"));
    clock.advance(Duration::from_secs(20 * 60));
    assert!(
        x.renew(&name, guard.holder_id(), THIRTY_MINUTES)
            .await
            .expect("renew")
    );
    let status = x.is_held(&name).await.expect("is_held");
    assert_eq!(status.expires_at_ms, Some(T0 + 50 * 60_000));

    let stranger = HolderId::try_new("pod-y:1:0:000000000000").expect("holder");
    assert!(!x.renew(&name, &stranger, THIRTY_MINUTES).await.expect("renew stranger"));

    assert!(matches!(
        x.renew(&name, guard.holder_id(), Duration::ZERO).await,
        Err(SyncError::InvalidInput(_))
    ));
    guard.release().await.expect("release");
}

#[tokio::test]
async fn zero_duration_is_rejected() {
    let dir = temp_dir("zero_duration");
    let x = pod(&dir, "pod-x", Arc::new(ManualClock::new(T0)));
    let result = x.acquire(&lock("sync-all"), Duration::ZERO).await;
    assert!(matches!(result, Err(SyncError::InvalidInput(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn renewal_keeps_a_short_lease_alive() {
    let dir = temp_dir("renewal_alive");
    let x = pod(&dir, "pod-x", Arc::new(SystemClock));
    let y = pod(&dir, "pod-y", Arc::new(SystemClock));
    let name = lock("sync-all");
    let lease = Duration::from_millis(300);

    let guard = expect_acquired(x.acquire(&name, lease).await.expect("acquire"));
    let first_expiry = x
        .is_held(&name)
        .await
        .expect("is_held")
        .expires_at_ms
        .expect("expiry");

    // Well past the original expiry; renewal every 100ms must have kept it.
    tokio::time::sleep(Duration::from_millis(900)).await;
    let status = y.is_held(&name).await.expect("is_held");
    assert!(status.held);
    assert_eq!(status.holder_id.as_deref(), Some(guard.holder_id().as_str()));
    assert!(status.expires_at_ms.expect("expiry") > first_expiry);
    assert!(!y.acquire(&name, lease).await.expect("acquire y").is_acquired());
    assert!(!guard.is_lost());

    assert!(guard.release().await.expect("release"));
    assert!(!y.is_held(&name).await.expect("is_held").held);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn renewal_notices_a_lost_lease() {
    let dir = temp_dir("renewal_lost");
    let x = pod(&dir, "pod-x", Arc::new(SystemClock));
    let operator = pod(&dir, "operator", Arc::new(SystemClock));
    let name = lock("sync-all");

    let guard = expect_acquired(
        x.acquire(&name, Duration::from_millis(300))
            .await
            .expect("acquire"),
    );
    assert!(
        operator
            .release(&name, guard.holder_id())
            .await
            .expect("operator release")
    );

    let mut lost = false;
    for _ in 0..50 {
        if guard.is_lost() {
            lost = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(lost, "renewal should flag the lease as lost");
    assert!(x.held_locks().is_empty());
    assert!(!guard.release().await.expect("release after loss"));
}

#[tokio::test]
async fn dropped_guard_releases_in_background() {
    let dir = temp_dir("guard_drop");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock.clone());
    let name = lock("sync-project-ABC");

    let guard = expect_acquired(x.acquire(&name, THIRTY_MINUTES).await.expect("acquire"));
    drop(guard);

    assert!(wait_until_free(&x, &name).await, "dropped guard left the lease held");
    assert!(x.held_locks().is_empty());
    let history = x.history(Some(&name), 10).await.expect("history");
    assert_eq!(history[0].release_reason.as_deref(), Some("released"));
}

#[tokio::test]
async fn shutdown_token_releases_everything_held() {
    let dir = temp_dir("shutdown_release");
    let clock = Arc::new(ManualClock::new(T0));
    let x = pod(&dir, "pod-x", clock.clone());
    let first = lock("sync-project-ABC");
    let second = lock("sync-project-XYZ");

    let g1 = expect_acquired(x.acquire(&first, THIRTY_MINUTES).await.expect("acquire 1"));
    let g2 = expect_acquired(x.acquire(&second, THIRTY_MINUTES).await.expect("acquire 2"));
    assert_eq!(x.held_locks().len(), 2);

    let shutdown = CancellationToken::new();
    let releaser = x.release_on_shutdown(shutdown.clone());
    shutdown.cancel();
    assert_eq!(releaser.await.expect("join"), 2);

    assert!(!x.is_held(&first).await.expect("is_held").held);
    assert!(!x.is_held(&second).await.expect("is_held").held);
    assert!(!g1.release().await.expect("release 1"));
    assert!(!g2.release().await.expect("release 2"));
}
