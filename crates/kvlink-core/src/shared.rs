//! Thread-safe registry handle for hosts that call in concurrently.

use crate::call::{dispatch, Call, Reply};
use crate::config::StoreOptions;
use crate::engine::{SqliteEngine, StorageEngine};
use crate::error::{KvError, Result};
use crate::registry::Registry;
use std::sync::{Mutex, MutexGuard};

/// A [`Registry`] behind a mutex.
///
/// Every operation holds the lock for its full duration, so operations on
/// the same instance never interleave and registry membership changes are
/// never observed half-done.
pub struct SharedRegistry<E: StorageEngine = SqliteEngine> {
    inner: Mutex<Registry<E>>,
}

impl<E: StorageEngine> SharedRegistry<E> {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            inner: Mutex::new(Registry::with_options(options)),
        }
    }

    /// Lock the registry for a sequence of operations.
    pub fn lock(&self) -> Result<MutexGuard<'_, Registry<E>>> {
        self.inner.lock().map_err(|_| KvError::LockPoisoned)
    }

    /// Run a single call under the lock.
    pub fn call(&self, call: Call) -> Result<Reply> {
        let mut registry = self.lock()?;
        dispatch(&mut registry, call)
    }

    /// Release every instance. Returns how many were released.
    pub fn release_all(&self) -> Result<usize> {
        Ok(self.lock()?.release_all())
    }
}

impl<E: StorageEngine> Default for SharedRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
