use crate::error::Result;
use jm_storage::{SqliteStore, StoreError};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Shared, thread-safe handle to one replica's store connection.
///
/// SQLite calls are blocking, so async callers go through [`StoreHandle::call`],
/// which runs them on the blocking pool.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    inner: Arc<Mutex<SqliteStore>>,
}

impl StoreHandle {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn open(storage_dir: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let store = SqliteStore::open_with_busy_timeout(storage_dir, busy_timeout)?;
        Ok(Self::new(store))
    }

    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let value = tokio::task::spawn_blocking(move || {
            let mut store = inner.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut store)
        })
        .await??;
        Ok(value)
    }

    /// Runs `f` on the current thread. For drop paths that have no runtime to hand.
    pub fn call_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteStore) -> std::result::Result<T, StoreError>,
    {
        let mut store = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut store)?)
    }
}
