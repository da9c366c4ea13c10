//! Table storage layer.
//!
//! Loads and saves table documents with a process-wide read-through
//! cache, an advisory `<table>.json.lock` companion file per table, and
//! atomic whole-file rewrites (write to a temp file in the same
//! directory, then rename over the target).
//!
//! The cache is coherent with writes made through this store; writes by
//! other processes are picked up after [`TableStore::invalidate`] or
//! [`TableStore::reset`].

use crate::config::Config;
use crate::error::Error;
use crate::schema::TableDoc;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

static SHARED: Lazy<Arc<TableStore>> = Lazy::new(|| Arc::new(TableStore::new()));

/// In-memory snapshot of parsed table documents plus the lock protocol.
#[derive(Debug, Default)]
pub struct TableStore {
    cache: Mutex<HashMap<PathBuf, TableDoc>>,
}

/// Holds `<table>.json.lock`; dropping it releases the lock.
#[derive(Debug)]
pub struct TableLock {
    path: PathBuf,
}

impl Drop for TableLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!("failed to release lock {}: {err}", self.path.display());
        }
    }
}

impl TableStore {
    pub fn new() -> Self {
        TableStore::default()
    }

    /// The process-wide store every [`crate::JsonDb`] uses by default.
    pub fn shared() -> Arc<TableStore> {
        SHARED.clone()
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<PathBuf, TableDoc>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the advisory lock for `path`, polling every
    /// `config.lock_poll` up to `config.lock_timeout`.
    pub fn lock(&self, path: &Path, config: &Config) -> Result<TableLock, Error> {
        let lock_path = lock_path(path);
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(file) => {
                    set_open_permissions(&file);
                    return Ok(TableLock {
                        path: lock_path,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= config.lock_timeout {
                        return Err(Error::LockTimeout(lock_path.display().to_string()));
                    }
                    tracing::trace!("waiting for lock {}", lock_path.display());
                    thread::sleep(config.lock_poll);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Read-through load: cache hit needs no lock; a miss takes the lock
    /// only for the duration of the disk read.
    pub fn load(&self, path: &Path, config: &Config) -> Result<TableDoc, Error> {
        if let Some(doc) = self.cache().get(path) {
            return Ok(doc.clone());
        }
        let _lock = self.lock(path, config)?;
        self.read(path)
    }

    /// Lock, write atomically, release.
    pub fn save(&self, path: &Path, doc: &TableDoc, config: &Config) -> Result<(), Error> {
        let _lock = self.lock(path, config)?;
        self.write(path, doc)
    }

    /// Read `path` from cache or disk. The caller holds the lock.
    pub(crate) fn read(&self, path: &Path) -> Result<TableDoc, Error> {
        if let Some(doc) = self.cache().get(path) {
            return Ok(doc.clone());
        }
        let bytes = fs::read(path)?;
        let doc: TableDoc = serde_json::from_slice(&bytes)?;
        self.cache().insert(path.to_path_buf(), doc.clone());
        Ok(doc)
    }

    /// Atomically replace `path` with `doc`. The caller holds the lock.
    /// A failed write drops the cache entry so the next read sees disk.
    pub(crate) fn write(&self, path: &Path, doc: &TableDoc) -> Result<(), Error> {
        let result = write_atomic(path, doc);
        match result {
            Ok(()) => {
                self.cache().insert(path.to_path_buf(), doc.clone());
                tracing::trace!("wrote table {}", path.display());
                Ok(())
            }
            Err(err) => {
                self.cache().remove(path);
                Err(err)
            }
        }
    }

    /// Drop one cached document.
    pub fn invalidate(&self, path: &Path) {
        self.cache().remove(path);
    }

    /// Drop every cached document.
    pub fn reset(&self) {
        self.cache().clear();
    }
}

fn write_atomic(path: &Path, doc: &TableDoc) -> Result<(), Error> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let parent = parent.unwrap_or_else(|| Path::new("."));
    let bytes = serde_json::to_vec(doc)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| Error::Io(err.error))?;
    set_path_permissions(path);
    Ok(())
}

/// `<table>.json` → `<table>.json.lock`.
fn lock_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

#[cfg(unix)]
fn set_open_permissions(file: &fs::File) {
    use std::os::unix::fs::PermissionsExt;
    let _ = file.set_permissions(fs::Permissions::from_mode(0o777));
}

#[cfg(not(unix))]
fn set_open_permissions(_file: &fs::File) {}

#[cfg(unix)]
pub(crate) fn set_path_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o777));
}

#[cfg(not(unix))]
pub(crate) fn set_path_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSchema, ColumnType};
    use indexmap::indexmap;
    use std::time::Duration;

    fn sample_doc() -> TableDoc {
        TableDoc::create(indexmap! {
            "name".to_string() => ColumnSchema::new(ColumnType::String),
        })
        .unwrap()
    }

    fn fast_config() -> Config {
        Config::default()
            .lock_timeout(Duration::from_millis(300))
            .lock_poll(Duration::from_millis(20))
    }

    #[test]
    fn test_save_then_load_is_coherent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = TableStore::new();
        let config = fast_config();

        let doc = sample_doc();
        store.save(&path, &doc, &config).unwrap();
        assert_eq!(store.load(&path, &config).unwrap(), doc);

        // And from disk after a cache reset.
        store.reset();
        assert_eq!(store.load(&path, &config).unwrap(), doc);
    }

    #[test]
    fn test_lock_release_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = TableStore::new();
        let config = fast_config();

        let lock = store.lock(&path, &config).unwrap();
        assert!(lock_path(&path).exists());
        drop(lock);
        assert!(!lock_path(&path).exists());
    }

    #[test]
    fn test_lock_contention_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = TableStore::new();
        let config = fast_config();

        let _held = store.lock(&path, &config).unwrap();
        let err = store.lock(&path, &config).unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
    }

    #[test]
    fn test_load_blocked_by_foreign_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = TableStore::new();
        let config = fast_config();
        store.save(&path, &sample_doc(), &config).unwrap();
        store.reset();

        // Another process holds the lock: the uncached load must wait
        // and eventually give up.
        fs::write(lock_path(&path), b"").unwrap();
        let err = store.load(&path, &config).unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));

        // A cached copy is served without touching the lock.
        fs::remove_file(lock_path(&path)).unwrap();
        store.load(&path, &config).unwrap();
        fs::write(lock_path(&path), b"").unwrap();
        store.load(&path, &config).unwrap();
    }

    #[test]
    fn test_invalidate_rereads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = TableStore::new();
        let config = fast_config();

        let mut doc = sample_doc();
        store.save(&path, &doc, &config).unwrap();

        // Simulate a foreign write.
        doc.properties.last_link_id = 9;
        let bytes = serde_json::to_vec(&doc).unwrap();
        fs::write(&path, bytes).unwrap();

        // Cached copy still served...
        assert_eq!(store.load(&path, &config).unwrap().properties.last_link_id, 0);
        // ...until invalidated.
        store.invalidate(&path);
        assert_eq!(store.load(&path, &config).unwrap().properties.last_link_id, 9);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ghost.json");
        let store = TableStore::new();
        let err = store.load(&path, &fast_config()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
