//! Error types for kvlink.
//!
//! Every failure a Store or the Registry can report is a variant of [`KvError`].
//! Engine-originated failures also carry an [`EngineErrorKind`], the short
//! diagnostic a Store keeps as its "last error".

use crate::registry::InstanceId;
use crate::store::StoreState;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Short diagnostic classification of an engine outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineErrorKind {
    #[default]
    Success,
    /// The store file is missing or the path cannot be opened.
    NoRepository,
    /// The filesystem or database refused access.
    NoPermission,
    /// The file exists but is not a valid store of this engine's format.
    BrokenFile,
    /// A uniqueness constraint was violated.
    Duplicate,
    /// The requested record does not exist.
    NoRecord,
    /// The operation is not valid in the store's current state.
    InvalidOperation,
    /// Disk full, I/O failure or another system-level fault.
    System,
    Misc,
}

impl EngineErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            EngineErrorKind::Success => "success",
            EngineErrorKind::NoRepository => "no repository",
            EngineErrorKind::NoPermission => "no permission",
            EngineErrorKind::BrokenFile => "broken file",
            EngineErrorKind::Duplicate => "record duplication",
            EngineErrorKind::NoRecord => "no record",
            EngineErrorKind::InvalidOperation => "invalid operation",
            EngineErrorKind::System => "system error",
            EngineErrorKind::Misc => "miscellaneous error",
        }
    }

    /// Classify a SQLite failure.
    pub fn from_sqlite(err: &rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotFound) => {
                EngineErrorKind::NoRepository
            }
            Some(ErrorCode::PermissionDenied)
            | Some(ErrorCode::ReadOnly)
            | Some(ErrorCode::AuthorizationForStatementDenied) => EngineErrorKind::NoPermission,
            Some(ErrorCode::NotADatabase) | Some(ErrorCode::DatabaseCorrupt) => {
                EngineErrorKind::BrokenFile
            }
            Some(ErrorCode::ConstraintViolation) => EngineErrorKind::Duplicate,
            Some(ErrorCode::ApiMisuse) => EngineErrorKind::InvalidOperation,
            Some(ErrorCode::DiskFull)
            | Some(ErrorCode::SystemIoFailure)
            | Some(ErrorCode::OutOfMemory)
            | Some(ErrorCode::FileLockingProtocolFailed)
            | Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked) => EngineErrorKind::System,
            _ => match err {
                rusqlite::Error::QueryReturnedNoRows => EngineErrorKind::NoRecord,
                _ => EngineErrorKind::Misc,
            },
        }
    }
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Main error type for kvlink.
#[derive(Debug, Error)]
pub enum KvError {
    // Registry errors
    #[error("No such instance: {id}")]
    NoSuchInstance { id: InstanceId },

    #[error("Instance already allocated: {id}")]
    InstanceExists { id: InstanceId },

    #[error("Instance registry lock poisoned")]
    LockPoisoned,

    // Store lifecycle errors
    #[error("Failed to open store at {path:?} ({kind}): {message}")]
    EngineOpen {
        path: PathBuf,
        kind: EngineErrorKind,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Store is not writable (state: {state})")]
    NotWritable { state: StoreState },

    #[error("Store is not open (state: {state})")]
    NotOpen { state: StoreState },

    #[error("Failed to close store ({kind}): {message}")]
    Close {
        kind: EngineErrorKind,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Engine I/O errors
    #[error("Engine error during {operation} ({kind}): {message}")]
    EngineIo {
        operation: &'static str,
        kind: EngineErrorKind,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Key dump to {path:?} failed: {message}")]
    KeyDump {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Call surface errors
    #[error("Invalid arguments for {operation}: {message}")]
    InvalidArguments { operation: String, message: String },

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
}

/// Result type alias for kvlink operations.
pub type Result<T> = std::result::Result<T, KvError>;

impl KvError {
    /// Wrap a SQLite failure raised while running `operation`.
    pub fn engine_io(operation: &'static str, err: rusqlite::Error) -> Self {
        KvError::EngineIo {
            operation,
            kind: EngineErrorKind::from_sqlite(&err),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Wrap a SQLite failure raised while opening the store at `path`.
    pub fn engine_open(path: impl Into<PathBuf>, err: rusqlite::Error) -> Self {
        KvError::EngineOpen {
            path: path.into(),
            kind: EngineErrorKind::from_sqlite(&err),
            message: err.to_string(),
            source: Some(err),
        }
    }

    pub fn invalid_arguments(operation: impl Into<String>, message: impl Into<String>) -> Self {
        KvError::InvalidArguments {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code for host bindings.
    pub fn code(&self) -> &'static str {
        match self {
            KvError::NoSuchInstance { .. } => "no_such_instance",
            KvError::InstanceExists { .. } => "instance_exists",
            KvError::LockPoisoned => "lock_poisoned",
            KvError::EngineOpen { .. } => "engine_open",
            KvError::NotWritable { .. } => "not_writable",
            KvError::NotOpen { .. } => "not_open",
            KvError::Close { .. } => "close",
            KvError::EngineIo { .. } => "engine_io",
            KvError::KeyDump { .. } => "key_dump",
            KvError::InvalidArguments { .. } => "invalid_arguments",
            KvError::UnknownOperation(_) => "unknown_operation",
        }
    }

    /// The diagnostic a Store records when this error ends one of its operations.
    pub fn engine_kind(&self) -> EngineErrorKind {
        match self {
            KvError::EngineOpen { kind, .. }
            | KvError::Close { kind, .. }
            | KvError::EngineIo { kind, .. } => *kind,
            KvError::NoSuchInstance { .. } => EngineErrorKind::NoRepository,
            KvError::KeyDump { .. } => EngineErrorKind::System,
            KvError::InstanceExists { .. }
            | KvError::LockPoisoned
            | KvError::NotWritable { .. }
            | KvError::NotOpen { .. }
            | KvError::InvalidArguments { .. }
            | KvError::UnknownOperation(_) => EngineErrorKind::InvalidOperation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KvError::NoSuchInstance { id: 7 };
        assert_eq!(err.to_string(), "No such instance: 7");

        let err = KvError::NotWritable {
            state: StoreState::ReadOnly,
        };
        assert_eq!(err.to_string(), "Store is not writable (state: read-only)");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(KvError::NoSuchInstance { id: 1 }.code(), "no_such_instance");
        assert_eq!(KvError::UnknownOperation("x".into()).code(), "unknown_operation");
        assert_eq!(
            KvError::NotOpen {
                state: StoreState::Closed
            }
            .code(),
            "not_open"
        );
    }

    #[test]
    fn test_sqlite_classification() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_NOTADB),
            None,
        );
        assert_eq!(EngineErrorKind::from_sqlite(&err), EngineErrorKind::BrokenFile);

        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            None,
        );
        assert_eq!(EngineErrorKind::from_sqlite(&err), EngineErrorKind::NoRepository);

        assert_eq!(
            EngineErrorKind::from_sqlite(&rusqlite::Error::QueryReturnedNoRows),
            EngineErrorKind::NoRecord
        );
    }

    #[test]
    fn test_engine_kind_for_state_errors() {
        let err = KvError::NotWritable {
            state: StoreState::Closed,
        };
        assert_eq!(err.engine_kind(), EngineErrorKind::InvalidOperation);
        assert_eq!(err.engine_kind().name(), "invalid operation");
    }
}
