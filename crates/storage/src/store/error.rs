#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    RunNotFound {
        id: i64,
    },
    RunAlreadyFinished {
        id: i64,
        status: String,
    },
    LeaseRace {
        lock_name: String,
        attempts: usize,
    },
}

impl StoreError {
    /// True for failures that may succeed on a later attempt (locked or busy database).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sql(rusqlite::Error::SqliteFailure(code, _)) => matches!(
                code.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(_) | Self::LeaseRace { .. } => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::RunNotFound { id } => write!(f, "run not found (id={id})"),
            Self::RunAlreadyFinished { id, status } => {
                write!(f, "run already finished (id={id}, status={status})")
            }
            Self::LeaseRace {
                lock_name,
                attempts,
            } => write!(
                f,
                "lease acquire kept racing (lock_name={lock_name}, attempts={attempts})"
            ),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Sql(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
