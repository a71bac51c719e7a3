#![forbid(unsafe_code)]

use jm_core::ids::RunKind;
use jm_core::model::RunStatus;
use jm_storage::{RunStartRequest, RunsListRequest, SqliteStore, StoreError};
use std::path::PathBuf;

const MINUTE_MS: i64 = 60_000;
const T0: i64 = 1_700_000_000_000;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("jm_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn kind(value: &str) -> RunKind {
    RunKind::try_new(value).expect("run kind")
}

fn start(store: &mut SqliteStore, value: &str, scope: Option<&str>, now_ms: i64) -> i64 {
    store
        .run_start(
            RunStartRequest {
                kind: kind(value),
                scope_json: scope.map(str::to_string),
            },
            now_ms,
        )
        .expect("run start")
        .id
}

#[test]
fn run_moves_from_running_to_completed_once() {
    let dir = temp_dir("run_moves_from_running_to_completed_once");
    let mut store = SqliteStore::open(&dir).expect("open");

    let id = start(&mut store, "project", Some(r#"{"key":"ABC"}"#), T0);
    let running = store.run_get(id).expect("get").expect("row");
    assert_eq!(running.status(), Some(RunStatus::Running));
    assert_eq!(running.end_time_ms, None);
    assert_eq!(running.scope_json.as_deref(), Some(r#"{"key":"ABC"}"#));

    let done = store
        .run_finish(id, Some(r#"{"issues":12}"#.to_string()), T0 + 2 * MINUTE_MS)
        .expect("finish");
    assert_eq!(done.status(), Some(RunStatus::Completed));
    assert_eq!(done.end_time_ms, Some(T0 + 2 * MINUTE_MS));
    assert_eq!(done.result_json.as_deref(), Some(r#"{"issues":12}"#));

    let err = store
        .run_fail(id, "late failure", T0 + 3 * MINUTE_MS)
        .expect_err("second finalize");
    match err {
        StoreError::RunAlreadyFinished { id: err_id, status } => {
            assert_eq!(err_id, id);
            assert_eq!(status, "completed");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failing_records_error_and_end_time() {
    let dir = temp_dir("failing_records_error_and_end_time");
    let mut store = SqliteStore::open(&dir).expect("open");

    let id = start(&mut store, "full", None, T0);
    let failed = store
        .run_fail(id, "jira returned 503", T0 + MINUTE_MS)
        .expect("fail");
    assert_eq!(failed.status(), Some(RunStatus::Failed));
    assert_eq!(failed.error.as_deref(), Some("jira returned 503"));
    assert_eq!(failed.end_time_ms, Some(T0 + MINUTE_MS));
    assert_eq!(failed.result_json, None);
}

#[test]
fn finalizing_unknown_run_is_an_error() {
    let dir = temp_dir("finalizing_unknown_run_is_an_error");
    let mut store = SqliteStore::open(&dir).expect("open");
    let err = store.run_finish(404, None, T0).expect_err("unknown");
    assert!(matches!(err, StoreError::RunNotFound { id: 404 }));
}

#[test]
fn invalid_scope_json_is_rejected() {
    let dir = temp_dir("invalid_scope_json_is_rejected");
    let mut store = SqliteStore::open(&dir).expect("open");
    let err = store
        .run_start(
            RunStartRequest {
                kind: kind("project"),
                scope_json: Some("{not json".to_string()),
            },
            T0,
        )
        .expect_err("bad json");
    assert!(matches!(err, StoreError::InvalidInput(_)));
}

#[test]
fn long_errors_are_truncated() {
    let dir = temp_dir("long_errors_are_truncated");
    let mut store = SqliteStore::open(&dir).expect("open");
    let id = start(&mut store, "full", None, T0);
    let failed = store
        .run_fail(id, &"é".repeat(5_000), T0 + 1)
        .expect("fail");
    let error = failed.error.expect("error");
    assert!(error.len() <= 4_000);
    assert!(error.chars().all(|ch| ch == 'é'));
}

#[test]
fn last_completed_ignores_running_and_failed() {
    let dir = temp_dir("last_completed_ignores_running_and_failed");
    let mut store = SqliteStore::open(&dir).expect("open");

    assert!(store.run_last_completed(&kind("full")).expect("query").is_none());

    let first = start(&mut store, "full", None, T0);
    store.run_finish(first, None, T0 + MINUTE_MS).expect("finish");

    let second = start(&mut store, "full", None, T0 + 10 * MINUTE_MS);
    store
        .run_fail(second, "boom", T0 + 11 * MINUTE_MS)
        .expect("fail");
    start(&mut store, "full", None, T0 + 20 * MINUTE_MS);

    let other = start(&mut store, "project", None, T0 + 30 * MINUTE_MS);
    store
        .run_finish(other, None, T0 + 31 * MINUTE_MS)
        .expect("finish other");

    let last = store
        .run_last_completed(&kind("full"))
        .expect("query")
        .expect("row");
    assert_eq!(last.id, first);
    assert_eq!(last.end_time_ms, Some(T0 + MINUTE_MS));
}

#[test]
fn runs_list_filters_by_kind_and_status() {
    let dir = temp_dir("runs_list_filters_by_kind_and_status");
    let mut store = SqliteStore::open(&dir).expect("open");

    let a = start(&mut store, "full", None, T0);
    store.run_finish(a, None, T0 + 1).expect("finish");
    let b = start(&mut store, "full", None, T0 + MINUTE_MS);
    store.run_fail(b, "x", T0 + MINUTE_MS + 1).expect("fail");
    start(&mut store, "project", None, T0 + 2 * MINUTE_MS);

    let all = store
        .runs_list(RunsListRequest {
            kind: None,
            status: None,
            limit: 10,
        })
        .expect("list");
    assert_eq!(all.runs.len(), 3);
    assert_eq!(all.runs[0].kind, "project");

    let failed_full = store
        .runs_list(RunsListRequest {
            kind: Some(kind("full")),
            status: Some(RunStatus::Failed),
            limit: 10,
        })
        .expect("list");
    assert_eq!(failed_full.runs.len(), 1);
    assert_eq!(failed_full.runs[0].id, b);

    let page = store
        .runs_list(RunsListRequest {
            kind: None,
            status: None,
            limit: 1,
        })
        .expect("list");
    assert_eq!(page.runs.len(), 1);
    assert!(page.has_more);
}

#[test]
fn abandoned_runs_are_failed_once() {
    let dir = temp_dir("abandoned_runs_are_failed_once");
    let mut store = SqliteStore::open(&dir).expect("open");

    let stuck = start(&mut store, "full", None, T0);
    let fresh = start(&mut store, "full", None, T0 + 100 * MINUTE_MS);

    let candidates = store
        .runs_running_before(T0 + 50 * MINUTE_MS, 10)
        .expect("running before");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].id, stuck);

    assert!(
        store
            .run_abandon(stuck, "abandoned", T0 + 101 * MINUTE_MS)
            .expect("abandon")
    );
    assert!(
        !store
            .run_abandon(stuck, "abandoned", T0 + 102 * MINUTE_MS)
            .expect("abandon twice")
    );
    let row = store.run_get(stuck).expect("get").expect("row");
    assert_eq!(row.status(), Some(RunStatus::Failed));
    assert_eq!(
        store.run_get(fresh).expect("get").expect("row").status(),
        Some(RunStatus::Running)
    );
}

#[test]
fn reopening_keeps_schema_and_rows() {
    let dir = temp_dir("reopening_keeps_schema_and_rows");
    let id = {
        let mut store = SqliteStore::open(&dir).expect("open");
        start(&mut store, "full", None, T0)
    };
    let store = SqliteStore::open(&dir).expect("reopen");
    assert!(store.run_get(id).expect("get").is_some());
}
