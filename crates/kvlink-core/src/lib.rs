//! kvlink - handle-based binding layer over persistent key-value stores.
//!
//! A host runtime refers to stores by integer identifier. Each identifier
//! owns one [`Store`], which is either unopened, open for writing, open
//! read-only, or closed. Stores are backed by a single-file, disk-backed
//! hash database ([`SqliteEngine`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use kvlink::Registry;
//!
//! fn main() -> kvlink::Result<()> {
//!     let mut registry: Registry = Registry::new();
//!     registry.allocate(1)?;
//!
//!     let store = registry.resolve_mut(1)?;
//!     store.open("/tmp/example.kvdb", true)?;
//!     store.set("a", "1")?;
//!     assert!(!store.add("a", "2")?);
//!     assert_eq!(store.get("a")?, Some(b"1".to_vec()));
//!
//!     let written = store.dump_keys("/tmp/example-keys.txt")?;
//!     println!("Dumped {} keys", written);
//!
//!     registry.release(1);
//!     Ok(())
//! }
//! ```
//!
//! Hosts that pass operations by name with scalar arguments go through
//! [`Call::from_args`] and [`dispatch`], or [`SharedRegistry::call`] when
//! they call in from several threads.

pub mod call;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod shared;
pub mod store;

mod dump;

// Re-export commonly used types
pub use call::{dispatch, Arg, Call, Reply};
pub use config::{DumpPolicy, EngineOptions, JournalMode, StoreOptions, SyncMode};
pub use engine::{OpenMode, SqliteEngine, StorageEngine};
pub use error::{EngineErrorKind, KvError, Result};
pub use registry::{InstanceId, Registry};
pub use shared::SharedRegistry;
pub use store::{Store, StoreState};

/// Crate version, as reported to hosts.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
