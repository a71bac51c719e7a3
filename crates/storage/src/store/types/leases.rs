#![forbid(unsafe_code)]

use jm_core::ids::{HolderId, LockName};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseRow {
    pub id: i64,
    pub lock_name: String,
    pub holder_id: String,
    pub acquired_at_ms: i64,
    pub expires_at_ms: i64,
    pub renewed_at_ms: i64,
    pub is_active: bool,
    pub released_at_ms: Option<i64>,
    pub release_reason: Option<String>, // released|expired
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct LeaseAcquireRequest {
    pub lock_name: LockName,
    pub holder_id: HolderId,
    pub duration_ms: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseAcquireResult {
    Acquired(LeaseRow),
    /// Another holder owns an unexpired lease.
    Held(LeaseRow),
}

#[derive(Clone, Debug)]
pub struct LeaseRenewRequest {
    pub lock_name: LockName,
    pub holder_id: HolderId,
    pub duration_ms: i64,
}

#[derive(Clone, Debug)]
pub struct LeaseHistoryRequest {
    pub lock_name: Option<LockName>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct LeaseHistoryResult {
    pub leases: Vec<LeaseRow>,
    pub has_more: bool,
}
