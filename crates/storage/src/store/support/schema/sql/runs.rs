#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        -- Append-only history of synchronization runs (throttle ledger).
        CREATE TABLE IF NOT EXISTS run_history (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          kind TEXT NOT NULL,
          start_time_ms INTEGER NOT NULL,
          end_time_ms INTEGER,
          status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
          scope_json TEXT,
          result_json TEXT,
          error TEXT,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          CHECK((status = 'running') = (end_time_ms IS NULL))
        );

        CREATE INDEX IF NOT EXISTS run_history_by_kind_status_end
          ON run_history(kind, status, end_time_ms);

        CREATE INDEX IF NOT EXISTS run_history_by_status_start
          ON run_history(status, start_time_ms);
"#;
