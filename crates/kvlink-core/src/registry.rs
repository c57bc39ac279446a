//! Instance registry: owns Stores by host-assigned integer identifier.

use crate::config::StoreOptions;
use crate::engine::{SqliteEngine, StorageEngine};
use crate::error::{KvError, Result};
use crate::store::Store;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Opaque identifier the host assigns to a store instance.
pub type InstanceId = i64;

/// Maps instance identifiers to the Stores they own.
///
/// At most one Store exists per identifier. Removing an entry always drops
/// (and therefore closes) its Store. Not synchronized; see
/// [`SharedRegistry`](crate::SharedRegistry) for use from a concurrent host.
pub struct Registry<E: StorageEngine = SqliteEngine> {
    instances: HashMap<InstanceId, Store<E>>,
    options: StoreOptions,
}

impl<E: StorageEngine> Registry<E> {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create a registry whose Stores all use `options`.
    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            instances: HashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Create an unopened Store for `id`.
    ///
    /// Fails with `InstanceExists` if `id` already has a live Store; the live
    /// Store is left untouched.
    pub fn allocate(&mut self, id: InstanceId) -> Result<()> {
        if self.instances.contains_key(&id) {
            return Err(KvError::InstanceExists { id });
        }

        self.instances.insert(id, Store::new(self.options.clone()));
        debug!("Allocated instance {}", id);
        Ok(())
    }

    /// Close and destroy the Store for `id`. Silent no-op if `id` is absent.
    ///
    /// Returns whether an instance was removed. Close failures are logged,
    /// never propagated.
    pub fn release(&mut self, id: InstanceId) -> bool {
        let Some(mut store) = self.instances.remove(&id) else {
            return false;
        };

        if store.state().is_open() {
            if let Err(e) = store.close() {
                warn!("Releasing instance {} after close failure: {}", id, e);
            }
        }

        debug!("Released instance {}", id);
        true
    }

    /// Close the Store for `id` and remove its entry.
    ///
    /// The entry is removed even when the close itself fails.
    pub fn close(&mut self, id: InstanceId) -> Result<()> {
        let mut store = self
            .instances
            .remove(&id)
            .ok_or(KvError::NoSuchInstance { id })?;

        store.close()
    }

    pub fn resolve(&self, id: InstanceId) -> Result<&Store<E>> {
        self.instances
            .get(&id)
            .ok_or(KvError::NoSuchInstance { id })
    }

    pub fn resolve_mut(&mut self, id: InstanceId) -> Result<&mut Store<E>> {
        self.instances
            .get_mut(&id)
            .ok_or(KvError::NoSuchInstance { id })
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Identifiers of all live instances, sorted.
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.instances.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Release every instance. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let ids = self.ids();
        ids.into_iter().filter(|id| self.release(*id)).count()
    }
}

impl<E: StorageEngine> Default for Registry<E> {
    fn default() -> Self {
        Self::new()
    }
}
