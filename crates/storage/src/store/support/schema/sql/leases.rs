#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        -- Named leases shared by every replica that points at this database.
        --
        -- Rows are never deleted: release and lazy expiry flip `is_active` to 0 and
        -- stamp `released_at_ms` / `release_reason`, so the table doubles as an audit log.
        CREATE TABLE IF NOT EXISTS leases (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          lock_name TEXT NOT NULL,
          holder_id TEXT NOT NULL,
          acquired_at_ms INTEGER NOT NULL,
          expires_at_ms INTEGER NOT NULL,
          renewed_at_ms INTEGER NOT NULL,
          is_active INTEGER NOT NULL CHECK(is_active IN (0, 1)),
          released_at_ms INTEGER,
          release_reason TEXT,               -- released|expired
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        -- At most one active lease per name. Keyed on the name alone: adding holder_id
        -- to this key would let two holders each own an active row.
        CREATE UNIQUE INDEX IF NOT EXISTS leases_one_active_per_name
          ON leases(lock_name) WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS leases_by_name_acquired
          ON leases(lock_name, acquired_at_ms);
"#;
