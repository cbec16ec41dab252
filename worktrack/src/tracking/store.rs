// Persistent key-value store used by the tracker and the task cache
// The file-backed store keeps every key in $STATE_DIR/store.json, written with
// an exclusive lock and write-to-temp + rename so a crash never leaves a torn file.

use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::warn;

/// Logical key names. Each key has exactly one writer component.
pub mod keys {
    /// Open tracking session (written by the session tracker)
    pub const ACTIVE_SESSION: &str = "worktrack.active-session";
    /// Local description edit for the open session
    pub const ACTIVE_SESSION_DESCRIPTION: &str = "worktrack.active-session-description";
    /// Session start, unix milliseconds
    pub const ACTIVE_SESSION_START_TIME: &str = "worktrack.active-session-start-time";
    /// Last fetched task list (written by the task cache)
    pub const TASK_LIST_CACHE: &str = "worktrack.task-list-cache";
    /// Capture time of the task list, unix milliseconds
    pub const TASK_LIST_CACHE_TIMESTAMP: &str = "worktrack.task-list-cache-timestamp";
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("store value is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable storage of JSON values that survives process restart
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed access on top of any [`KeyValueStore`]
#[async_trait]
pub trait StoreExt: KeyValueStore {
    async fn get_json<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get_item(key).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn set_json<T: Serialize + Sync + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.set_item(key, value).await
    }
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {}

// ============================================================================
// File-backed store
// ============================================================================

/// Store that keeps all keys in a single JSON object file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = lock_sibling(&path)?;
            let mut map = match load_map(&path) {
                Ok(map) => map,
                Err(StoreError::Serde(e)) => {
                    let moved_to = quarantine(&path)?;
                    warn!(
                        path = %path.display(),
                        moved_to = %moved_to.display(),
                        error = %e,
                        "unparseable store file moved aside, starting empty"
                    );
                    Map::new()
                }
                Err(e) => return Err(e),
            };
            mutate(&mut map);
            save_map(&path, &map)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.update(move |map| {
            map.insert(key, value);
        })
        .await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Ok(load_map(&path)?.remove(&key)))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let key = key.to_string();
        self.update(move |map| {
            map.remove(&key);
        })
        .await
    }
}

/// Load the key map from disk; a missing or blank file is an empty map
fn load_map(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    if contents.trim().is_empty() {
        return Ok(Map::new());
    }

    Ok(serde_json::from_str(&contents)?)
}

/// Rename an unparseable store file to `<name>.corrupt`, replacing any older one
fn quarantine(path: &Path) -> Result<PathBuf, StoreError> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".corrupt");
    let moved_to = path.with_file_name(name);
    fs::rename(path, &moved_to).map_err(|e| StoreError::io(path, e))?;
    Ok(moved_to)
}

fn save_map(path: &Path, map: &Map<String, Value>) -> Result<(), StoreError> {
    let contents = serde_json::to_string_pretty(map)?;
    atomic_write(path, &contents)
}

/// Take an exclusive lock on `<path>.lock`, released when the file is dropped.
///
/// The data file itself is replaced by rename, so the lock lives beside it.
fn lock_sibling(path: &Path) -> Result<fs::File, StoreError> {
    let lock_path = path.with_extension("lock");
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| StoreError::io(&lock_path, e))?;

    file.lock_exclusive()
        .map_err(|e| StoreError::io(&lock_path, e))?;

    Ok(file)
}

/// Atomically save data to a file using write-to-temp + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Unavailable(format!("invalid path: {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;

    // Same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("store"),
        std::process::id()
    ));

    fs::write(&temp_path, contents).map_err(|e| StoreError::io(&temp_path, e))?;
    fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e))?;

    Ok(())
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Can be switched off to simulate an unavailable backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: StdMutex<HashMap<String, Value>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Synchronous peek, for assertions
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.check()?;
        Ok(self
            .items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
