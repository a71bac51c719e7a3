use jm_core::ids::{HolderIdError, LockNameError, RunKindError};
use jm_storage::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid lock name: {0}")]
    LockName(#[from] LockNameError),

    #[error("invalid holder id: {0}")]
    HolderId(#[from] HolderIdError),

    #[error("invalid run kind: {0}")]
    RunKind(#[from] RunKindError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Store failures that may clear up on their own (busy or locked database).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            Self::Join(_) => true,
            _ => false,
        }
    }
}

impl From<figment::Error> for SyncError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
