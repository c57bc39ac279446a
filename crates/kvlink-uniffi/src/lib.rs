//! UniFFI bindings for kvlink.
//!
//! Exposes a thread-safe store registry to Python, C#, Swift, Kotlin and the
//! other UniFFI targets. Keys and values cross the boundary as byte arrays.
//!
//! # Usage
//!
//! Generate bindings using `--library` mode:
//!
//! ```bash
//! # Build the cdylib
//! cargo build -p kvlink-uniffi --release
//!
//! # Generate Python bindings
//! kvlink-uniffi-bindgen generate --library --language python \
//!     --out-dir ./bindings/python target/release/libkvlink_uniffi.so
//! ```

use kvlink::{DumpPolicy, JournalMode, KvError, SharedRegistry, StoreOptions};
use std::sync::Arc;
use tracing::debug;

/// FFI-friendly error type.
///
/// Mirrors `KvError` with engine sources flattened into messages.
#[derive(Debug, Clone, uniffi::Error, thiserror::Error)]
pub enum FfiError {
    #[error("No such instance: {id}")]
    NoSuchInstance { id: i64 },

    #[error("Instance already allocated: {id}")]
    InstanceExists { id: i64 },

    #[error("Failed to open store: {message}")]
    EngineOpen { message: String },

    #[error("{message}")]
    NotWritable { message: String },

    #[error("{message}")]
    NotOpen { message: String },

    #[error("Failed to close store: {message}")]
    Close { message: String },

    #[error("Engine error: {message}")]
    EngineIo { message: String },

    #[error("Key dump failed: {message}")]
    KeyDump { message: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

impl From<KvError> for FfiError {
    fn from(err: KvError) -> Self {
        let message = err.to_string();
        match err {
            KvError::NoSuchInstance { id } => FfiError::NoSuchInstance { id },
            KvError::InstanceExists { id } => FfiError::InstanceExists { id },
            KvError::LockPoisoned => FfiError::LockPoisoned,
            KvError::EngineOpen { .. } => FfiError::EngineOpen { message },
            KvError::NotWritable { .. } => FfiError::NotWritable { message },
            KvError::NotOpen { .. } => FfiError::NotOpen { message },
            KvError::Close { .. } => FfiError::Close { message },
            KvError::EngineIo { .. } => FfiError::EngineIo { message },
            KvError::KeyDump { .. } => FfiError::KeyDump { message },
            KvError::InvalidArguments { .. } | KvError::UnknownOperation(_) => {
                FfiError::InvalidArguments { message }
            }
        }
    }
}

/// Result type for FFI operations.
pub type FfiResult<T> = Result<T, FfiError>;

// UniFFI scaffolding - this generates the FFI glue code
uniffi::setup_scaffolding!();

/// Get the version of the kvlink-uniffi bindings.
#[uniffi::export]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Options applied to every store a registry creates.
#[derive(Debug, Clone, Default, uniffi::Record)]
pub struct FfiStoreOptions {
    /// Write-ahead journaling for writable stores.
    pub wal: bool,
    /// Key dumps warn and report 0 instead of failing.
    pub lenient_dump: bool,
}

impl From<FfiStoreOptions> for StoreOptions {
    fn from(options: FfiStoreOptions) -> Self {
        let mut store_options = StoreOptions::default();
        if options.wal {
            store_options = store_options.with_journal_mode(JournalMode::Wal);
        }
        if options.lenient_dump {
            store_options = store_options.with_dump_policy(DumpPolicy::Lenient);
        }
        store_options
    }
}

/// Outcome of a lookup. A missing key is `found: false` with an empty value.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct FfiLookup {
    pub found: bool,
    pub value: Vec<u8>,
}

impl From<Option<Vec<u8>>> for FfiLookup {
    fn from(value: Option<Vec<u8>>) -> Self {
        match value {
            Some(value) => Self { found: true, value },
            None => Self {
                found: false,
                value: Vec::new(),
            },
        }
    }
}

/// Registry of stores addressed by integer instance id.
#[derive(uniffi::Object)]
pub struct FfiRegistry {
    inner: SharedRegistry,
}

impl FfiRegistry {
    /// Run `f` against the store for `id` under the registry lock.
    fn with_store<T>(
        &self,
        id: i64,
        f: impl FnOnce(&mut kvlink::Store) -> kvlink::Result<T>,
    ) -> FfiResult<T> {
        let mut registry = self.inner.lock()?;
        let store = registry.resolve_mut(id)?;
        Ok(f(store)?)
    }
}

#[uniffi::export]
impl FfiRegistry {
    /// Create an empty registry with default options.
    #[uniffi::constructor]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SharedRegistry::new(),
        })
    }

    /// Create an empty registry with the given options.
    #[uniffi::constructor]
    pub fn with_options(options: FfiStoreOptions) -> Arc<Self> {
        debug!("Creating registry with {:?}", options);
        Arc::new(Self {
            inner: SharedRegistry::with_options(options.into()),
        })
    }

    pub fn allocate(&self, id: i64) -> FfiResult<()> {
        Ok(self.inner.lock()?.allocate(id)?)
    }

    /// Close and destroy the store for `id`. Unknown ids are ignored.
    pub fn release(&self, id: i64) -> FfiResult<()> {
        self.inner.lock()?.release(id);
        Ok(())
    }

    pub fn open(&self, id: i64, path: String, truncate: bool) -> FfiResult<()> {
        self.with_store(id, |store| store.open(&path, truncate))
    }

    pub fn open_read_only(&self, id: i64, path: String) -> FfiResult<()> {
        self.with_store(id, |store| store.open_read_only(&path))
    }

    /// Close the store for `id` and remove it from the registry.
    pub fn close(&self, id: i64) -> FfiResult<()> {
        Ok(self.inner.lock()?.close(id)?)
    }

    pub fn get(&self, id: i64, key: Vec<u8>) -> FfiResult<FfiLookup> {
        self.with_store(id, |store| store.get(&key))
            .map(FfiLookup::from)
    }

    pub fn check(&self, id: i64, key: Vec<u8>) -> FfiResult<bool> {
        self.with_store(id, |store| store.check(&key))
    }

    /// Insert or replace. With `overwrite` false, inserts only if absent and
    /// returns whether it did.
    pub fn set(&self, id: i64, key: Vec<u8>, value: Vec<u8>, overwrite: bool) -> FfiResult<bool> {
        self.with_store(id, |store| {
            if overwrite {
                store.set(&key, &value).map(|_| true)
            } else {
                store.add(&key, &value)
            }
        })
    }

    pub fn size(&self, id: i64) -> FfiResult<u64> {
        self.with_store(id, |store| store.size())
    }

    pub fn key_dump(&self, id: i64, destination: String) -> FfiResult<u64> {
        self.with_store(id, |store| store.dump_keys(&destination))
    }

    /// Short diagnostic for the last failed operation on `id`.
    pub fn last_error(&self, id: i64) -> FfiResult<String> {
        let registry = self.inner.lock()?;
        Ok(registry.resolve(id)?.describe_last_error().to_string())
    }

    /// Ids of all live instances, sorted.
    pub fn instance_ids(&self) -> FfiResult<Vec<i64>> {
        Ok(self.inner.lock()?.ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(temp_dir: &TempDir, name: &str) -> String {
        temp_dir.path().join(name).to_string_lossy().into_owned()
    }

    #[test]
    fn test_ffi_error_conversion() {
        let err: FfiError = KvError::NoSuchInstance { id: 3 }.into();
        assert!(matches!(err, FfiError::NoSuchInstance { id: 3 }));

        let err: FfiError = KvError::UnknownOperation("nope".to_string()).into();
        assert!(matches!(err, FfiError::InvalidArguments { .. }));
    }

    #[test]
    fn test_store_options_conversion() {
        let options: StoreOptions = FfiStoreOptions {
            wal: true,
            lenient_dump: true,
        }
        .into();
        assert_eq!(options.engine.journal_mode, JournalMode::Wal);
        assert_eq!(options.dump_policy, DumpPolicy::Lenient);
    }

    #[test]
    fn test_registry_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let registry = FfiRegistry::new();

        registry.allocate(1).unwrap();
        registry.open(1, path(&temp_dir, "u.kvdb"), true).unwrap();

        assert!(registry.set(1, b"a".to_vec(), b"1".to_vec(), true).unwrap());
        assert!(!registry.set(1, b"a".to_vec(), b"2".to_vec(), false).unwrap());
        assert_eq!(
            registry.get(1, b"a".to_vec()).unwrap(),
            FfiLookup {
                found: true,
                value: b"1".to_vec()
            }
        );
        assert_eq!(
            registry.get(1, b"zz".to_vec()).unwrap(),
            FfiLookup {
                found: false,
                value: Vec::new()
            }
        );
        assert!(registry.check(1, b"a".to_vec()).unwrap());
        assert_eq!(registry.size(1).unwrap(), 1);
        assert_eq!(
            registry.key_dump(1, path(&temp_dir, "keys.txt")).unwrap(),
            1
        );

        registry.close(1).unwrap();
        assert!(registry.instance_ids().unwrap().is_empty());
    }

    #[test]
    fn test_errors_cross_the_boundary() {
        let temp_dir = TempDir::new().unwrap();
        let registry = FfiRegistry::new();

        assert!(matches!(
            registry.size(8).unwrap_err(),
            FfiError::NoSuchInstance { id: 8 }
        ));

        registry.allocate(8).unwrap();
        assert!(matches!(
            registry.allocate(8).unwrap_err(),
            FfiError::InstanceExists { id: 8 }
        ));

        assert!(matches!(
            registry
                .open_read_only(8, path(&temp_dir, "missing.kvdb"))
                .unwrap_err(),
            FfiError::EngineOpen { .. }
        ));
        assert_eq!(registry.last_error(8).unwrap(), "no repository");

        registry.release(8).unwrap();
        registry.release(8).unwrap();
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
