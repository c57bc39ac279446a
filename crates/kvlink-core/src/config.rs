//! Centralized configuration for kvlink.
//!
//! Constant holders for engine and dump parameters, plus the runtime
//! [`StoreOptions`] a host can supply (as JSON or in code) when it creates
//! a registry.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage engine constants.
pub struct EngineConfig;

impl EngineConfig {
    pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
    /// On-disk layout version written into every store this engine creates.
    pub const FORMAT_VERSION: i64 = 1;
    pub const META_FORMAT_VERSION: &'static str = "format_version";
    pub const META_RECORD_COUNT: &'static str = "record_count";
}

/// Key dump constants.
pub struct DumpConfig;

impl DumpConfig {
    pub const LINE_TERMINATOR: u8 = b'\n';
    pub const WRITE_BUFFER_BYTES: usize = 64 * 1024;
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Rollback journal; the store stays a single file between sessions.
    #[default]
    Delete,
    /// Write-ahead log.
    Wal,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Wal => "wal",
        }
    }
}

/// SQLite sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Full,
    Normal,
}

impl SyncMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// How a key dump reacts to an unwritable destination or an unrepresentable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpPolicy {
    /// Report a `KeyDump` error.
    #[default]
    Strict,
    /// Log a warning and carry on: an unopenable destination yields 0 keys
    /// written, a key containing a line terminator is skipped.
    Lenient,
}

/// Options passed to the storage engine on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub journal_mode: JournalMode,
    pub sync_mode: SyncMode,
    pub busy_timeout_ms: u64,
}

impl EngineOptions {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            busy_timeout_ms: EngineConfig::DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Options shared by every Store a registry allocates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub engine: EngineOptions,
    pub dump_policy: DumpPolicy,
}

impl StoreOptions {
    /// Parse options from a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_journal_mode(mut self, journal_mode: JournalMode) -> Self {
        self.engine.journal_mode = journal_mode;
        self
    }

    pub fn with_dump_policy(mut self, dump_policy: DumpPolicy) -> Self {
        self.dump_policy = dump_policy;
        self
    }
}
