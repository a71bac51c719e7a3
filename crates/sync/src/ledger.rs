//! Run history and the throttle gate.

use crate::clock::{Clock, duration_to_ms};
use crate::error::{Result, SyncError};
use crate::lock_name::derive_lock_name;
use crate::store::StoreHandle;
use jm_core::ids::RunKind;
use jm_core::model::{RunStatus, minutes_remaining};
use jm_storage::{RunRow, RunStartRequest, RunsListRequest};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const ABANDONED_ERROR: &str = "abandoned: run did not finish";
const SWEEP_BATCH: usize = 200;

/// Ownership of one `running` record. Consumed by [`RunLedger::finish`] or
/// [`RunLedger::fail`], so each record is finalized at most once per handle.
#[derive(Debug)]
pub struct RunHandle {
    id: i64,
    kind: RunKind,
    started_at_ms: i64,
}

impl RunHandle {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn kind(&self) -> &RunKind {
        &self.kind
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub kind: String,
    pub status: &'static str,
    pub scope: Value,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::parse(self.status)
    }
}

impl TryFrom<RunRow> for RunRecord {
    type Error = SyncError;

    fn try_from(row: RunRow) -> Result<Self> {
        let status = row
            .status()
            .ok_or_else(|| SyncError::CorruptRow(format!("run {} status {}", row.id, row.status)))?;
        let scope = match row.scope_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => Value::Null,
        };
        let result = row
            .result_json
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;
        Ok(Self {
            id: row.id,
            kind: row.kind,
            status: status.as_str(),
            scope,
            start_time_ms: row.start_time_ms,
            end_time_ms: row.end_time_ms,
            result,
            error: row.error,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThrottleDecision {
    pub allowed: bool,
    /// Whole minutes until the next run is allowed, rounded up. Zero when allowed.
    pub minutes_remaining: i64,
    pub last_completed_at_ms: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub inspected: usize,
    pub abandoned: Vec<i64>,
    /// Stale records left alone because their lock is still held.
    pub skipped_held: Vec<i64>,
}

enum SweepStep {
    Abandoned,
    Held,
    AlreadyFinished,
}

#[derive(Clone, Debug)]
pub struct RunLedger {
    store: StoreHandle,
    clock: Arc<dyn Clock>,
}

impl RunLedger {
    pub fn new(store: StoreHandle, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn start_run(&self, kind: &RunKind, scope: &Value) -> Result<RunHandle> {
        let now_ms = self.clock.now_ms();
        let scope_json = match scope {
            Value::Null => None,
            other => Some(serde_json::to_string(other)?),
        };
        let request = RunStartRequest {
            kind: kind.clone(),
            scope_json,
        };
        let row = self
            .store
            .call(move |store| store.run_start(request, now_ms))
            .await?;
        tracing::info!(run_id = row.id, kind = %kind, "run started");
        Ok(RunHandle {
            id: row.id,
            kind: kind.clone(),
            started_at_ms: row.start_time_ms,
        })
    }

    pub async fn finish(&self, handle: RunHandle, result: &Value) -> Result<RunRecord> {
        let now_ms = self.clock.now_ms();
        let result_json = match result {
            Value::Null => None,
            other => Some(serde_json::to_string(other)?),
        };
        let id = handle.id;
        let row = self
            .store
            .call(move |store| store.run_finish(id, result_json, now_ms))
            .await?;
        tracing::info!(
            run_id = id,
            kind = %handle.kind,
            elapsed_ms = now_ms - handle.started_at_ms,
            "run completed"
        );
        RunRecord::try_from(row)
    }

    pub async fn fail(&self, handle: RunHandle, error: &str) -> Result<RunRecord> {
        let now_ms = self.clock.now_ms();
        let id = handle.id;
        let message = error.to_string();
        let row = self
            .store
            .call(move |store| store.run_fail(id, &message, now_ms))
            .await?;
        tracing::warn!(
            run_id = id,
            kind = %handle.kind,
            elapsed_ms = now_ms - handle.started_at_ms,
            error = %error,
            "run failed"
        );
        RunRecord::try_from(row)
    }

    /// Whether `minimum_interval` has passed since the last completed run of `kind`.
    pub async fn can_run(&self, kind: &RunKind, minimum_interval: Duration) -> Result<ThrottleDecision> {
        let now_ms = self.clock.now_ms();
        let lookup = kind.clone();
        let last = self
            .store
            .call(move |store| store.run_last_completed(&lookup))
            .await?;

        let Some(last_end_ms) = last.and_then(|row| row.end_time_ms) else {
            return Ok(ThrottleDecision {
                allowed: true,
                minutes_remaining: 0,
                last_completed_at_ms: None,
            });
        };

        let elapsed_ms = now_ms.saturating_sub(last_end_ms);
        let remaining_ms = duration_to_ms(minimum_interval).saturating_sub(elapsed_ms);
        Ok(ThrottleDecision {
            allowed: remaining_ms <= 0,
            minutes_remaining: minutes_remaining(remaining_ms),
            last_completed_at_ms: Some(last_end_ms),
        })
    }

    pub async fn get_history(&self, kind: Option<&RunKind>, limit: usize) -> Result<Vec<RunRecord>> {
        let request = RunsListRequest {
            kind: kind.cloned(),
            status: None,
            limit,
        };
        let result = self
            .store
            .call(move |store| store.runs_list(request))
            .await?;
        result.runs.into_iter().map(RunRecord::try_from).collect()
    }

    /// Fails `running` records older than `older_than` whose lock is no longer held.
    ///
    /// Their creator crashed before finalizing. This is an operator action; the
    /// coordinator never calls it, so a stuck record stays visible until someone does.
    pub async fn sweep_abandoned(&self, older_than: Duration) -> Result<SweepReport> {
        let now_ms = self.clock.now_ms();
        let cutoff_ms = now_ms.saturating_sub(duration_to_ms(older_than));
        let candidates = self
            .store
            .call(move |store| store.runs_running_before(cutoff_ms, SWEEP_BATCH))
            .await?;

        let mut report = SweepReport {
            inspected: candidates.len(),
            ..SweepReport::default()
        };
        for row in candidates {
            let id = row.id;
            let lock_name = RunRecord::try_from(row).ok().and_then(|record| {
                let kind = RunKind::try_new(record.kind).ok()?;
                derive_lock_name(&kind, &record.scope).ok()
            });

            let step = self
                .store
                .call(move |store| {
                    if let Some(lock_name) = lock_name {
                        if store.lease_inspect(&lock_name, now_ms)?.is_some() {
                            return Ok(SweepStep::Held);
                        }
                    }
                    Ok(if store.run_abandon(id, ABANDONED_ERROR, now_ms)? {
                        SweepStep::Abandoned
                    } else {
                        SweepStep::AlreadyFinished
                    })
                })
                .await?;

            match step {
                SweepStep::Abandoned => {
                    tracing::warn!(run_id = id, "marked abandoned run as failed");
                    report.abandoned.push(id);
                }
                SweepStep::Held => report.skipped_held.push(id),
                SweepStep::AlreadyFinished => {}
            }
        }
        Ok(report)
    }
}
