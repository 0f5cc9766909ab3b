//! Shared key-value storage
//!
//! A string-keyed map of JSON values shared with the consumer process.
//! The only atomic primitive is a read-modify-write of a single key;
//! callers must not assume updates to different keys happen together.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out waiting for store lock {0:?}")]
    LockTimeout(PathBuf),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Cross-process map of string keys to JSON values
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Atomically replace the value of `key` with `f(current)`
    ///
    /// Returning `None` removes the key.
    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Option<Value>) -> StoreResult<()>;

    fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut value = Some(value);
        self.update(key, &mut |_| value.take())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.update(key, &mut |_| None)
    }

    /// Append to the list stored at `key`, creating it if needed
    fn append_to_list(&self, key: &str, value: Value) -> StoreResult<()> {
        let mut value = Some(value);
        self.update(key, &mut |current| {
            let mut list = into_list(current);
            list.extend(value.take());
            Some(Value::Array(list))
        })
    }

    /// Remove list entries matching `predicate`, returning how many went
    fn remove_matching(&self, key: &str, predicate: &dyn Fn(&Value) -> bool) -> StoreResult<usize> {
        let mut removed = 0;
        self.update(key, &mut |current| {
            let current = current?;
            let mut list = into_list(Some(current));
            let before = list.len();
            list.retain(|entry| !predicate(entry));
            removed = before - list.len();
            Some(Value::Array(list))
        })?;
        Ok(removed)
    }
}

/// The list stored in a value; anything that is not a list counts as empty
pub fn into_list(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(list)) => list,
        Some(other) => {
            tracing::warn!("Expected a list in shared store, found {}", other);
            Vec::new()
        }
        None => Vec::new(),
    }
}

pub fn get_bool(store: &dyn SharedStore, key: &str) -> StoreResult<Option<bool>> {
    Ok(store.get(key)?.and_then(|v| v.as_bool()))
}

/// String value of `key`; empty strings count as absent
pub fn get_string(store: &dyn SharedStore, key: &str) -> StoreResult<Option<String>> {
    Ok(store
        .get(key)?
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|s| !s.is_empty()))
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Option<Value>) -> StoreResult<()> {
        let mut values = self.values.lock();
        let current = values.remove(key);
        if let Some(next) = f(current) {
            values.insert(key.to_string(), next);
        }
        Ok(())
    }
}

const LOCK_TIMEOUT: Duration = Duration::from_secs(2);
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Store backed by one JSON file
///
/// Updates take an exclusive lock file and replace the data file
/// atomically, so readers never see a partial write.
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: path.with_file_name(lock_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> StoreResult<Map<String, Value>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_map(&self, map: &Map<String, Value>) -> StoreResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, map)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<LockGuard> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&self.lock_path) {
                Ok(_) => {
                    return Ok(LockGuard {
                        path: self.lock_path.clone(),
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.lock_is_stale() {
                        tracing::warn!("Breaking stale store lock {:?}", self.lock_path);
                        let _ = std::fs::remove_file(&self.lock_path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(StoreError::LockTimeout(self.lock_path.clone()));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn lock_is_stale(&self) -> bool {
        std::fs::metadata(&self.lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .map(|age| age > LOCK_STALE_AFTER)
            .unwrap_or(false)
    }
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release store lock {:?}: {}", self.path, e);
        }
    }
}

impl SharedStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(Option<Value>) -> Option<Value>) -> StoreResult<()> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        let current = map.remove(key);
        if let Some(next) = f(current) {
            map.insert(key.to_string(), next);
        }
        self.write_map(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn exercise(store: &dyn SharedStore) {
        assert_eq!(store.get("missing").unwrap(), None);

        store.put("flag", json!(true)).unwrap();
        assert_eq!(get_bool(store, "flag").unwrap(), Some(true));

        store.append_to_list("list", json!({"id": 1})).unwrap();
        store.append_to_list("list", json!({"id": 2})).unwrap();
        store.append_to_list("list", json!({"id": 1})).unwrap();
        let removed = store
            .remove_matching("list", &|v| v.get("id") == Some(&json!(1)))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get("list").unwrap(), Some(json!([{"id": 2}])));

        store.put("name", json!("")).unwrap();
        assert_eq!(get_string(store, "name").unwrap(), None);

        store.remove("flag").unwrap();
        assert_eq!(store.get("flag").unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_file_store() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("shared").join("store.json")).unwrap();
        exercise(&store);

        // A second handle sees the same data
        let other = FileStore::open(store.path()).unwrap();
        assert_eq!(other.get("list").unwrap(), Some(json!([{"id": 2}])));
        assert!(!dir.path().join("shared").join("store.json.lock").exists());
    }

    #[test]
    fn test_file_store_concurrent_appends_are_not_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = Arc::new(FileStore::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = FileStore::open(&path).unwrap();
                    for i in 0..10 {
                        store.append_to_list("list", json!(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let list = into_list(store.get("list").unwrap());
        assert_eq!(list.len(), 40);
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(&dir.path().join("store.json")).unwrap();
        let lock = dir.path().join("store.json.lock");
        let file = std::fs::File::create(&lock).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(60)).unwrap();
        drop(file);

        store.put("k", json!(1)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(1)));
    }
}
