#![forbid(unsafe_code)]

use jm_core::ids::RunKind;
use jm_core::model::RunStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRow {
    pub id: i64,
    pub kind: String,
    pub start_time_ms: i64,
    pub end_time_ms: Option<i64>,
    pub status: String, // running|completed|failed
    pub scope_json: Option<String>,
    pub result_json: Option<String>,
    pub error: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl RunRow {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }
}

#[derive(Clone, Debug)]
pub struct RunStartRequest {
    pub kind: RunKind,
    pub scope_json: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RunsListRequest {
    pub kind: Option<RunKind>,
    pub status: Option<RunStatus>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct RunsListResult {
    pub runs: Vec<RunRow>,
    pub has_more: bool,
}
