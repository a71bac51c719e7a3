#![forbid(unsafe_code)]

//! Lease-based coordination for synchronization jobs shared by several replicas.
//!
//! The database is the only coordination point: [`LeaseManager`] hands out named,
//! time-bounded leases, [`RunLedger`] records every run and answers the throttle
//! question, and [`SyncCoordinator`] combines both around an opaque unit of work.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod lease;
pub mod ledger;
pub mod lock_name;
pub mod logging;
pub mod shutdown;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, LoggingConfig, SyncConfig};
pub use coordinator::{RunPolicy, SyncCoordinator, SyncOutcome};
pub use error::{Result, SyncError};
pub use identity::HolderIdentity;
pub use lease::{AcquireOutcome, LeaseGuard, LeaseManager, LeaseStatus};
pub use ledger::{RunHandle, RunLedger, RunRecord, SweepReport, ThrottleDecision};
pub use lock_name::derive_lock_name;
pub use store::StoreHandle;
