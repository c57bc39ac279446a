//! Storage engine abstraction.
//!
//! A Store drives exactly one engine handle. Any persistent key-value engine
//! that can open a path in writer or reader mode, read and write opaque byte
//! records, count them without a scan and iterate keys can back a Store.

mod sqlite;

pub use sqlite::SqliteEngine;

use crate::config::EngineOptions;
use crate::error::Result;
use std::path::Path;

/// Mode an engine handle is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the store if absent; discard existing records when `truncate` is set.
    Writer { truncate: bool },
    /// Open an existing store for reads only.
    Reader,
}

impl OpenMode {
    pub fn is_writer(&self) -> bool {
        matches!(self, OpenMode::Writer { .. })
    }
}

/// Persistent key-value engine capability.
///
/// All operations are synchronous and block on the filesystem.
pub trait StorageEngine: Sized + Send {
    /// Open the store at `path`.
    fn open(path: &Path, mode: OpenMode, options: &EngineOptions) -> Result<Self>;

    /// Flush and release the handle.
    fn close(self) -> Result<()>;

    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Size in bytes of the value under `key`, or a negative number if absent.
    fn value_size(&self, key: &[u8]) -> Result<i64>;

    /// Insert or replace the value under `key`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Insert only if `key` is absent. Returns whether a record was inserted.
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<bool>;

    /// Number of distinct keys, read from store metadata.
    fn count(&self) -> Result<u64>;

    /// Visit every key once, in the engine's native order, over a single
    /// consistent snapshot.
    fn scan_keys(&self, visit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;
}
