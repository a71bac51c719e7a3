#![forbid(unsafe_code)]

use super::*;
use jm_core::ids::{HolderId, LockName};
use jm_core::model::ReleaseReason;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};

const MAX_ACQUIRE_ATTEMPTS: usize = 3;

const LEASE_COLUMNS: &str = "id, lock_name, holder_id, acquired_at_ms, expires_at_ms, renewed_at_ms, \
     is_active, released_at_ms, release_reason, created_at_ms, updated_at_ms";

fn read_lease_row(row: &rusqlite::Row<'_>) -> Result<LeaseRow, rusqlite::Error> {
    Ok(LeaseRow {
        id: row.get(0)?,
        lock_name: row.get(1)?,
        holder_id: row.get(2)?,
        acquired_at_ms: row.get(3)?,
        expires_at_ms: row.get(4)?,
        renewed_at_ms: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
        released_at_ms: row.get(7)?,
        release_reason: row.get(8)?,
        created_at_ms: row.get(9)?,
        updated_at_ms: row.get(10)?,
    })
}

/// Flips active-but-expired rows for `lock_name` to inactive. Returns how many rows changed.
fn expire_stale_tx(
    tx: &Transaction<'_>,
    lock_name: &str,
    now_ms: i64,
) -> Result<usize, StoreError> {
    Ok(tx.execute(
        r#"
        UPDATE leases
        SET is_active=0, released_at_ms=?2, release_reason=?3, updated_at_ms=?2
        WHERE lock_name=?1 AND is_active=1 AND expires_at_ms <= ?2
        "#,
        params![lock_name, now_ms, ReleaseReason::Expired.as_str()],
    )?)
}

fn load_active_tx(tx: &Transaction<'_>, lock_name: &str) -> Result<Option<LeaseRow>, StoreError> {
    Ok(tx
        .query_row(
            &format!("SELECT {LEASE_COLUMNS} FROM leases WHERE lock_name=?1 AND is_active=1"),
            params![lock_name],
            read_lease_row,
        )
        .optional()?)
}

enum AcquireAttempt {
    Done(LeaseAcquireResult),
    Raced,
}

fn acquire_once(
    conn: &mut Connection,
    request: &LeaseAcquireRequest,
    now_ms: i64,
) -> Result<AcquireAttempt, StoreError> {
    let lock_name = request.lock_name.as_str();

    // IMMEDIATE takes the database write lock up front, so the read below cannot be
    // invalidated by another connection before our insert.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    expire_stale_tx(&tx, lock_name, now_ms)?;

    if let Some(current) = load_active_tx(&tx, lock_name)? {
        tx.commit()?;
        return Ok(AcquireAttempt::Done(LeaseAcquireResult::Held(current)));
    }

    let expires_at_ms = now_ms.saturating_add(request.duration_ms);
    let insert = tx.execute(
        r#"
        INSERT INTO leases(
          lock_name, holder_id, acquired_at_ms, expires_at_ms, renewed_at_ms,
          is_active, released_at_ms, release_reason, created_at_ms, updated_at_ms
        )
        VALUES (?1, ?2, ?3, ?4, ?3, 1, NULL, NULL, ?3, ?3)
        "#,
        params![
            lock_name,
            request.holder_id.as_str(),
            now_ms,
            expires_at_ms
        ],
    );
    match insert {
        Ok(_) => {}
        Err(err) if is_constraint_violation(&err) => return Ok(AcquireAttempt::Raced),
        Err(err) => return Err(StoreError::Sql(err)),
    }

    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok(AcquireAttempt::Done(LeaseAcquireResult::Acquired(LeaseRow {
        id,
        lock_name: lock_name.to_string(),
        holder_id: request.holder_id.as_str().to_string(),
        acquired_at_ms: now_ms,
        expires_at_ms,
        renewed_at_ms: now_ms,
        is_active: true,
        released_at_ms: None,
        release_reason: None,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    })))
}

impl SqliteStore {
    /// Claims `lock_name` for `holder_id` unless another unexpired lease exists.
    ///
    /// Expired leases for the same name are retired inside the same transaction, so a
    /// crashed holder never blocks the name past its expiry.
    pub fn lease_acquire(
        &mut self,
        request: LeaseAcquireRequest,
        now_ms: i64,
    ) -> Result<LeaseAcquireResult, StoreError> {
        validate_duration_ms(request.duration_ms)?;

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            match acquire_once(&mut self.conn, &request, now_ms)? {
                AcquireAttempt::Done(result) => return Ok(result),
                AcquireAttempt::Raced => continue,
            }
        }

        Err(StoreError::LeaseRace {
            lock_name: request.lock_name.as_str().to_string(),
            attempts: MAX_ACQUIRE_ATTEMPTS,
        })
    }

    /// Extends the lease owned by `holder_id`. `None` means the lease is gone: released,
    /// expired, or owned by someone else.
    pub fn lease_renew(
        &mut self,
        request: LeaseRenewRequest,
        now_ms: i64,
    ) -> Result<Option<LeaseRow>, StoreError> {
        validate_duration_ms(request.duration_ms)?;
        let lock_name = request.lock_name.as_str();
        let holder_id = request.holder_id.as_str();
        let expires_at_ms = now_ms.saturating_add(request.duration_ms);

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        expire_stale_tx(&tx, lock_name, now_ms)?;

        let changed = tx.execute(
            r#"
            UPDATE leases
            SET expires_at_ms=?3, renewed_at_ms=?4, updated_at_ms=?4
            WHERE lock_name=?1 AND holder_id=?2 AND is_active=1
            "#,
            params![lock_name, holder_id, expires_at_ms, now_ms],
        )?;
        if changed != 1 {
            tx.commit()?;
            return Ok(None);
        }

        let row = load_active_tx(&tx, lock_name)?;
        tx.commit()?;
        Ok(row)
    }

    /// Deactivates the live lease owned by `holder_id`. Releasing a lease that is already
    /// inactive, expired, or held by someone else changes nothing and returns `false`.
    pub fn lease_release(
        &mut self,
        lock_name: &LockName,
        holder_id: &HolderId,
        now_ms: i64,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            r#"
            UPDATE leases
            SET is_active=0, released_at_ms=?3, release_reason=?4, updated_at_ms=?3
            WHERE lock_name=?1 AND holder_id=?2 AND is_active=1 AND expires_at_ms > ?3
            "#,
            params![
                lock_name.as_str(),
                holder_id.as_str(),
                now_ms,
                ReleaseReason::Released.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Current live lease for `lock_name`, after retiring an expired one.
    pub fn lease_inspect(
        &mut self,
        lock_name: &LockName,
        now_ms: i64,
    ) -> Result<Option<LeaseRow>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        expire_stale_tx(&tx, lock_name.as_str(), now_ms)?;
        let row = load_active_tx(&tx, lock_name.as_str())?;
        tx.commit()?;
        Ok(row)
    }

    pub fn lease_history(
        &self,
        request: LeaseHistoryRequest,
    ) -> Result<LeaseHistoryResult, StoreError> {
        let limit = clamp_list_limit(request.limit);
        let limit_plus = limit.saturating_add(1) as i64;
        let lock_name = request.lock_name.as_ref().map(LockName::as_str);

        let mut leases = Vec::<LeaseRow>::new();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {LEASE_COLUMNS}
            FROM leases
            WHERE (?1 IS NULL OR lock_name=?1)
            ORDER BY acquired_at_ms DESC, id DESC
            LIMIT ?2
            "#
        ))?;
        let rows = stmt.query_map(params![lock_name, limit_plus], read_lease_row)?;
        for row in rows {
            leases.push(row?);
        }

        let has_more = leases.len() > limit;
        leases.truncate(limit);

        Ok(LeaseHistoryResult { leases, has_more })
    }
}
