#![forbid(unsafe_code)]

use super::*;
use jm_core::ids::RunKind;
use jm_core::model::RunStatus;
use rusqlite::{OptionalExtension, params};

const MAX_RUN_ERROR_LEN: usize = 4_000;
const MAX_RUN_JSON_LEN: usize = 256_000;

const RUN_COLUMNS: &str = "id, kind, start_time_ms, end_time_ms, status, scope_json, result_json, \
     error, created_at_ms, updated_at_ms";

fn read_run_row(row: &rusqlite::Row<'_>) -> Result<RunRow, rusqlite::Error> {
    Ok(RunRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        start_time_ms: row.get(2)?,
        end_time_ms: row.get(3)?,
        status: row.get(4)?,
        scope_json: row.get(5)?,
        result_json: row.get(6)?,
        error: row.get(7)?,
        created_at_ms: row.get(8)?,
        updated_at_ms: row.get(9)?,
    })
}

fn normalize_json(raw: Option<String>, what: &'static str) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.len() > MAX_RUN_JSON_LEN {
        return Err(StoreError::InvalidInput(what));
    }
    if serde_json::from_str::<serde_json::Value>(trimmed).is_err() {
        return Err(StoreError::InvalidInput(what));
    }
    Ok(Some(trimmed.to_string()))
}

fn truncate_error(raw: &str) -> String {
    let raw = raw.trim();
    if raw.len() <= MAX_RUN_ERROR_LEN {
        return raw.to_string();
    }
    let mut end = MAX_RUN_ERROR_LEN;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

impl SqliteStore {
    pub fn run_start(&mut self, request: RunStartRequest, now_ms: i64) -> Result<RunRow, StoreError> {
        let scope_json = normalize_json(request.scope_json, "run scope must be valid JSON")?;

        self.conn.execute(
            r#"
            INSERT INTO run_history(
              kind, start_time_ms, end_time_ms, status, scope_json, result_json, error,
              created_at_ms, updated_at_ms
            )
            VALUES (?1, ?2, NULL, ?3, ?4, NULL, NULL, ?2, ?2)
            "#,
            params![
                request.kind.as_str(),
                now_ms,
                RunStatus::Running.as_str(),
                scope_json.as_deref()
            ],
        )?;

        Ok(RunRow {
            id: self.conn.last_insert_rowid(),
            kind: request.kind.as_str().to_string(),
            start_time_ms: now_ms,
            end_time_ms: None,
            status: RunStatus::Running.as_str().to_string(),
            scope_json,
            result_json: None,
            error: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        })
    }

    pub fn run_finish(
        &mut self,
        id: i64,
        result_json: Option<String>,
        now_ms: i64,
    ) -> Result<RunRow, StoreError> {
        let result_json = normalize_json(result_json, "run result must be valid JSON")?;
        self.run_terminate(id, RunStatus::Completed, result_json, None, now_ms)
    }

    pub fn run_fail(&mut self, id: i64, error: &str, now_ms: i64) -> Result<RunRow, StoreError> {
        let error = truncate_error(error);
        self.run_terminate(id, RunStatus::Failed, None, Some(error), now_ms)
    }

    fn run_terminate(
        &mut self,
        id: i64,
        status: RunStatus,
        result_json: Option<String>,
        error: Option<String>,
        now_ms: i64,
    ) -> Result<RunRow, StoreError> {
        let tx = self.conn.transaction()?;

        // Only the running -> terminal edge is allowed; a second finalize is an error.
        let changed = tx.execute(
            r#"
            UPDATE run_history
            SET status=?2, end_time_ms=?3, result_json=?4, error=?5, updated_at_ms=?3
            WHERE id=?1 AND status='running'
            "#,
            params![id, status.as_str(), now_ms, result_json, error],
        )?;
        if changed != 1 {
            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM run_history WHERE id=?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            return Err(match current {
                None => StoreError::RunNotFound { id },
                Some(status) => StoreError::RunAlreadyFinished { id, status },
            });
        }

        let row = tx.query_row(
            &format!("SELECT {RUN_COLUMNS} FROM run_history WHERE id=?1"),
            params![id],
            read_run_row,
        )?;
        tx.commit()?;
        Ok(row)
    }

    pub fn run_get(&self, id: i64) -> Result<Option<RunRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM run_history WHERE id=?1"),
                params![id],
                read_run_row,
            )
            .optional()?)
    }

    /// Most recent `completed` run of `kind` by end time. Running and failed runs never
    /// count toward the throttle.
    pub fn run_last_completed(&self, kind: &RunKind) -> Result<Option<RunRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    r#"
                    SELECT {RUN_COLUMNS}
                    FROM run_history
                    WHERE kind=?1 AND status='completed'
                    ORDER BY end_time_ms DESC, id DESC
                    LIMIT 1
                    "#
                ),
                params![kind.as_str()],
                read_run_row,
            )
            .optional()?)
    }

    pub fn runs_list(&self, request: RunsListRequest) -> Result<RunsListResult, StoreError> {
        let limit = clamp_list_limit(request.limit);
        let limit_plus = limit.saturating_add(1) as i64;
        let kind = request.kind.as_ref().map(RunKind::as_str);
        let status = request.status.map(RunStatus::as_str);

        let mut runs = Vec::<RunRow>::new();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM run_history
            WHERE (?1 IS NULL OR kind=?1)
              AND (?2 IS NULL OR status=?2)
            ORDER BY start_time_ms DESC, id DESC
            LIMIT ?3
            "#
        ))?;
        let rows = stmt.query_map(params![kind, status, limit_plus], read_run_row)?;
        for row in rows {
            runs.push(row?);
        }

        let has_more = runs.len() > limit;
        runs.truncate(limit);

        Ok(RunsListResult { runs, has_more })
    }

    /// `running` records that started at or before `cutoff_ms`, oldest first.
    pub fn runs_running_before(
        &self,
        cutoff_ms: i64,
        limit: usize,
    ) -> Result<Vec<RunRow>, StoreError> {
        let limit = clamp_list_limit(limit) as i64;
        let mut out = Vec::new();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM run_history
            WHERE status='running' AND start_time_ms <= ?1
            ORDER BY start_time_ms ASC, id ASC
            LIMIT ?2
            "#
        ))?;
        let rows = stmt.query_map(params![cutoff_ms, limit], read_run_row)?;
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Marks a still-running record as failed on behalf of a creator that never came back.
    /// Returns `false` when the record already reached a terminal state.
    pub fn run_abandon(&mut self, id: i64, reason: &str, now_ms: i64) -> Result<bool, StoreError> {
        match self.run_fail(id, reason, now_ms) {
            Ok(_) => Ok(true),
            Err(StoreError::RunAlreadyFinished { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
