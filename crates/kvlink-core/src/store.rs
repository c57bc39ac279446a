//! A single persistent key-value store and its lifecycle.

use crate::config::StoreOptions;
use crate::dump;
use crate::engine::{OpenMode, SqliteEngine, StorageEngine};
use crate::error::{EngineErrorKind, KvError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Lifecycle state of a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreState {
    Unopened,
    Writable,
    ReadOnly,
    /// Terminal: every operation issued after close fails.
    Closed,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Unopened => "unopened",
            StoreState::Writable => "writable",
            StoreState::ReadOnly => "read-only",
            StoreState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, StoreState::Writable | StoreState::ReadOnly)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persistent key-value store.
///
/// Owns at most one engine handle. The handle is closed by [`Store::close`]
/// or, failing that, when the Store is dropped; a close failure during drop
/// is logged and never propagated.
pub struct Store<E: StorageEngine = SqliteEngine> {
    engine: Option<E>,
    state: StoreState,
    path: Option<PathBuf>,
    options: StoreOptions,
    last_error: EngineErrorKind,
}

impl<E: StorageEngine> Store<E> {
    /// Create an unopened store.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            engine: None,
            state: StoreState::Unopened,
            path: None,
            options,
            last_error: EngineErrorKind::Success,
        }
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    /// Path the store was opened at, if it was ever opened.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Diagnostic kind of the most recent failed operation.
    ///
    /// Advisory only; operations report success or failure through their own
    /// return values.
    pub fn last_error(&self) -> EngineErrorKind {
        self.last_error
    }

    /// Short diagnostic name of the most recent failed operation.
    pub fn describe_last_error(&self) -> &'static str {
        self.last_error.name()
    }

    /// Record the outcome of an operation as the store's last error.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.last_error = e.engine_kind();
        }
        result
    }

    fn open_with(&mut self, path: &Path, mode: OpenMode) -> Result<()> {
        if self.state != StoreState::Unopened {
            let message = match self.state {
                StoreState::Closed => "store has been closed".to_string(),
                state => format!("store is already open ({})", state),
            };
            return self.track(Err(KvError::EngineOpen {
                path: path.to_path_buf(),
                kind: EngineErrorKind::InvalidOperation,
                message,
                source: None,
            }));
        }

        let opened = E::open(path, mode, &self.options.engine);
        let engine = self.track(opened)?;

        self.engine = Some(engine);
        self.path = Some(path.to_path_buf());
        self.state = if mode.is_writer() {
            StoreState::Writable
        } else {
            StoreState::ReadOnly
        };

        info!("Opened {} store at {}", self.state, path.display());
        Ok(())
    }

    /// Open (creating if absent) a writable store at `path`.
    ///
    /// With `truncate` set, existing records are discarded first; otherwise
    /// they are preserved and new keys merge in.
    pub fn open(&mut self, path: impl AsRef<Path>, truncate: bool) -> Result<()> {
        self.open_with(path.as_ref(), OpenMode::Writer { truncate })
    }

    /// Open an existing store strictly for reads.
    pub fn open_read_only(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.open_with(path.as_ref(), OpenMode::Reader)
    }

    /// Flush and release the engine handle. The store is Closed afterwards,
    /// whether or not the engine reported a failure.
    pub fn close(&mut self) -> Result<()> {
        let result = match self.state {
            StoreState::Closed => Err(KvError::Close {
                kind: EngineErrorKind::InvalidOperation,
                message: "store is already closed".to_string(),
                source: None,
            }),
            _ => match self.engine.take() {
                Some(engine) => engine.close(),
                None => Ok(()),
            },
        };

        if self.state != StoreState::Closed {
            debug!("Store {:?} closed (was {})", self.path, self.state);
        }
        self.state = StoreState::Closed;
        self.track(result)
    }

    fn reader(&self) -> Result<&E> {
        match (&self.engine, self.state) {
            (Some(engine), state) if state.is_open() => Ok(engine),
            (_, state) => Err(KvError::NotOpen { state }),
        }
    }

    fn writer(&mut self) -> Result<&mut E> {
        match (&mut self.engine, self.state) {
            (Some(engine), StoreState::Writable) => Ok(engine),
            (_, state) => Err(KvError::NotWritable { state }),
        }
    }

    /// Look up `key`. A missing key is `Ok(None)`, never an error.
    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let result = self.reader().and_then(|engine| engine.get(key.as_ref()));
        self.track(result)
    }

    /// Report whether `key` is present without retrieving its value.
    pub fn check(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let result = self
            .reader()
            .and_then(|engine| engine.value_size(key.as_ref()))
            .map(|size| size >= 0);
        self.track(result)
    }

    /// Insert or replace the value under `key`.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let result = self
            .writer()
            .and_then(|engine| engine.set(key.as_ref(), value.as_ref()));
        self.track(result)
    }

    /// Insert only if `key` is absent. Returns `false`, not an error, when the
    /// key already exists.
    pub fn add(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let result = self
            .writer()
            .and_then(|engine| engine.add(key.as_ref(), value.as_ref()));
        self.track(result)
    }

    /// Number of distinct keys currently stored.
    pub fn size(&mut self) -> Result<u64> {
        let result = self.reader().and_then(|engine| engine.count());
        self.track(result)
    }

    /// Write every key to `destination`, one per line. Returns the number of
    /// keys written.
    pub fn dump_keys(&mut self, destination: impl AsRef<Path>) -> Result<u64> {
        let policy = self.options.dump_policy;
        let result = self
            .reader()
            .and_then(|engine| dump::dump_keys(engine, destination.as_ref(), policy));
        self.track(result)
    }
}

impl<E: StorageEngine> Default for Store<E> {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl<E: StorageEngine> fmt::Debug for Store<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state)
            .field("path", &self.path)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl<E: StorageEngine> Drop for Store<E> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            if let Err(e) = engine.close() {
                error!("Store close error for {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DumpPolicy;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, Store) {
        let temp_dir = TempDir::new().unwrap();
        let mut store = Store::default();
        store.open(temp_dir.path().join("store.kvdb"), true).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_new_store_is_unopened() {
        let store: Store = Store::default();
        assert_eq!(store.state(), StoreState::Unopened);
        assert!(store.path().is_none());
        assert_eq!(store.describe_last_error(), "success");
    }

    #[test]
    fn test_reads_before_open_fail() {
        let mut store: Store = Store::default();

        assert!(matches!(
            store.get("a").unwrap_err(),
            KvError::NotOpen {
                state: StoreState::Unopened
            }
        ));
        assert!(matches!(
            store.set("a", "1").unwrap_err(),
            KvError::NotWritable {
                state: StoreState::Unopened
            }
        ));
        assert_eq!(store.last_error(), EngineErrorKind::InvalidOperation);
    }

    #[test]
    fn test_set_get_add() {
        let (_temp, mut store) = create_test_store();

        store.set("a", "1").unwrap();
        assert!(!store.add("a", "2").unwrap());
        assert!(store.add("b", "3").unwrap());

        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
        assert_eq!(store.get("b").unwrap().unwrap(), b"3");
        assert_eq!(store.size().unwrap(), 2);
    }

    #[test]
    fn test_absence_is_not_failure() {
        let (_temp, mut store) = create_test_store();

        assert!(store.get("never").unwrap().is_none());
        assert!(!store.check("never").unwrap());
        assert_eq!(store.last_error(), EngineErrorKind::Success);
    }

    #[test]
    fn test_check_empty_value_is_present() {
        let (_temp, mut store) = create_test_store();

        store.set("k", "").unwrap();
        assert!(store.check("k").unwrap());
    }

    #[test]
    fn test_open_twice_fails() {
        let (temp, mut store) = create_test_store();

        let err = store
            .open(temp.path().join("other.kvdb"), false)
            .unwrap_err();
        assert!(matches!(
            err,
            KvError::EngineOpen {
                kind: EngineErrorKind::InvalidOperation,
                ..
            }
        ));
        assert_eq!(store.state(), StoreState::Writable);
        assert_eq!(store.describe_last_error(), "invalid operation");
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.kvdb");

        let mut store: Store = Store::default();
        store.open(&path, false).unwrap();
        store.set("a", "1").unwrap();
        store.close().unwrap();

        let mut reader: Store = Store::default();
        reader.open_read_only(&path).unwrap();
        assert_eq!(reader.state(), StoreState::ReadOnly);
        assert_eq!(reader.get("a").unwrap().unwrap(), b"1");
        assert!(reader.check("a").unwrap());
        assert_eq!(reader.size().unwrap(), 1);

        assert!(matches!(
            reader.set("b", "2").unwrap_err(),
            KvError::NotWritable {
                state: StoreState::ReadOnly
            }
        ));
        assert!(matches!(
            reader.add("b", "2").unwrap_err(),
            KvError::NotWritable { .. }
        ));
    }

    #[test]
    fn test_failed_open_stays_unopened() {
        let temp_dir = TempDir::new().unwrap();
        let mut store: Store = Store::default();

        let err = store
            .open_read_only(temp_dir.path().join("absent.kvdb"))
            .unwrap_err();
        assert!(matches!(err, KvError::EngineOpen { .. }));
        assert_eq!(store.state(), StoreState::Unopened);
        assert_eq!(store.last_error(), EngineErrorKind::NoRepository);

        store.open(temp_dir.path().join("present.kvdb"), false).unwrap();
        assert_eq!(store.state(), StoreState::Writable);
    }

    #[test]
    fn test_close_is_terminal() {
        let (temp, mut store) = create_test_store();
        store.set("a", "1").unwrap();

        store.close().unwrap();
        assert_eq!(store.state(), StoreState::Closed);

        assert!(matches!(
            store.set("a", "2").unwrap_err(),
            KvError::NotWritable {
                state: StoreState::Closed
            }
        ));
        assert!(matches!(
            store.size().unwrap_err(),
            KvError::NotOpen {
                state: StoreState::Closed
            }
        ));
        assert!(matches!(store.close().unwrap_err(), KvError::Close { .. }));
        assert!(store
            .open(temp.path().join("store.kvdb"), false)
            .is_err());
    }

    #[test]
    fn test_close_unopened() {
        let mut store: Store = Store::default();
        store.close().unwrap();
        assert_eq!(store.state(), StoreState::Closed);
    }

    #[test]
    fn test_drop_closes_engine() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("store.kvdb");
        {
            let mut store: Store = Store::default();
            store.open(&path, false).unwrap();
            store.set("kept", "yes").unwrap();
        }

        let mut store: Store = Store::default();
        store.open_read_only(&path).unwrap();
        assert_eq!(store.get("kept").unwrap().unwrap(), b"yes");
    }

    #[test]
    fn test_dump_matches_size() {
        let (temp, mut store) = create_test_store();
        for key in ["x", "y", "z"] {
            store.set(key, "v").unwrap();
        }
        store.add("x", "other").unwrap();

        let dest = temp.path().join("keys.txt");
        let count = store.dump_keys(&dest).unwrap();
        assert_eq!(count, store.size().unwrap());
        assert_eq!(std::fs::read_to_string(&dest).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_dump_policy_applies() {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions::default().with_dump_policy(DumpPolicy::Lenient);
        let mut store: Store = Store::new(options);
        store.open(temp_dir.path().join("store.kvdb"), true).unwrap();
        store.set("a", "1").unwrap();

        let count = store
            .dump_keys(temp_dir.path().join("missing/keys.txt"))
            .unwrap();
        assert_eq!(count, 0);
    }
}
