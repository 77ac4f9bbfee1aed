// ABOUTME: Process-wide store handle: lazily constructed exactly once via double-checked locking.
// ABOUTME: acquire() is the only way outside code obtains the shared SessionStore.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use super::sqlite::SessionStore;
use crate::config::Config;
use crate::error::Result;

/// File name of the session database inside the data directory.
pub const DATABASE_FILE: &str = "sleep_history.db";

/// A lazily initialized value guarded by double-checked locking.
///
/// Readers take a lock-free fast path once the value is published. The first
/// callers serialize on `lock`, and only the first to enter the critical
/// section with the cell still empty runs the constructor. A failed
/// construction publishes nothing, so a later call may try again.
pub struct Singleton<T> {
    cell: OnceLock<T>,
    lock: Mutex<()>,
}

impl<T> Singleton<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> std::result::Result<T, E>) -> std::result::Result<&T, E> {
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(value) = self.cell.get() {
            return Ok(value);
        }

        let value = init()?;
        Ok(self.cell.get_or_init(|| value))
    }
}

impl<T> Default for Singleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the store keeps its data. Built from configuration by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreContext {
    pub data_dir: PathBuf,
}

impl StoreContext {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage.resolved_data_dir())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

/// Shared reference to the initialized session store.
#[derive(Clone)]
pub struct StoreHandle(Arc<SessionStore>);

impl StoreHandle {
    /// Wrap a store that was built outside the process-wide slot (tests, tools).
    pub fn new(store: SessionStore) -> Self {
        Self(Arc::new(store))
    }

    pub fn ptr_eq(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for StoreHandle {
    type Target = SessionStore;

    fn deref(&self) -> &SessionStore {
        &self.0
    }
}

static STORE: Singleton<StoreHandle> = Singleton::new();
static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);

/// Return the process-wide store, opening it on the first call.
///
/// Later calls ignore `context` and hand back the handle built by the first
/// successful call.
pub fn acquire(context: &StoreContext) -> Result<StoreHandle> {
    let handle = STORE.get_or_try_init(|| {
        let path = context.database_path();
        let store = SessionStore::open(&path)?;
        CONSTRUCTIONS.fetch_add(1, Ordering::SeqCst);
        tracing::info!(path = %path.display(), "session store initialized");
        Ok::<_, crate::error::Error>(StoreHandle::new(store))
    })?;
    Ok(handle.clone())
}

/// How many times the process-wide store has been constructed.
pub fn construction_count() -> usize {
    CONSTRUCTIONS.load(Ordering::SeqCst)
}
