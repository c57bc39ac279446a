//! Fixed-arity call surface.
//!
//! Hosts invoke operations by name with a positional list of scalar
//! arguments, the instance id first. [`Call::from_args`] validates the
//! operation name and the exact arity and argument kinds, and [`dispatch`]
//! runs the call against a [`Registry`].

use crate::engine::StorageEngine;
use crate::error::{KvError, Result};
use crate::registry::{InstanceId, Registry};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// A scalar argument as the host passes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Integer(i64),
    Text(String),
    Boolean(bool),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Arg::Integer(_) => "integer",
            Arg::Text(_) => "text",
            Arg::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Integer(i) => write!(f, "{}", i),
            Arg::Text(s) => write!(f, "{:?}", s),
            Arg::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Integer(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Boolean(value)
    }
}

/// A validated operation on the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Allocate { id: InstanceId },
    Release { id: InstanceId },
    Open { id: InstanceId, path: PathBuf, truncate: bool },
    OpenReadOnly { id: InstanceId, path: PathBuf },
    Close { id: InstanceId },
    Get { id: InstanceId, key: String },
    Check { id: InstanceId, key: String },
    /// `overwrite` selects an unconditional upsert; otherwise insert-if-absent.
    Set {
        id: InstanceId,
        key: String,
        value: String,
        overwrite: bool,
    },
    Size { id: InstanceId },
    KeyDump { id: InstanceId, destination: PathBuf },
    LastError { id: InstanceId },
}

/// Positional argument reader that reports arity and kind mismatches.
struct Args<'a> {
    operation: &'a str,
    args: &'a [Arg],
    next: usize,
}

impl<'a> Args<'a> {
    fn new(operation: &'a str, args: &'a [Arg], expected: usize) -> Result<Self> {
        if args.len() != expected {
            return Err(KvError::invalid_arguments(
                operation,
                format!("expected {} arguments, got {}", expected, args.len()),
            ));
        }
        Ok(Self {
            operation,
            args,
            next: 0,
        })
    }

    fn take(&mut self, expected: &str) -> Result<&'a Arg> {
        let position = self.next;
        self.next += 1;
        self.args.get(position).ok_or_else(|| {
            KvError::invalid_arguments(
                self.operation,
                format!("missing {} argument {}", expected, position + 1),
            )
        })
    }

    fn mismatch(&self, expected: &str, got: &Arg) -> KvError {
        KvError::invalid_arguments(
            self.operation,
            format!(
                "argument {} must be {}, got {} {}",
                self.next,
                expected,
                got.kind(),
                got
            ),
        )
    }

    fn integer(&mut self) -> Result<i64> {
        match self.take("integer")? {
            Arg::Integer(i) => Ok(*i),
            other => Err(self.mismatch("integer", other)),
        }
    }

    fn text(&mut self) -> Result<String> {
        match self.take("text")? {
            Arg::Text(s) => Ok(s.clone()),
            other => Err(self.mismatch("text", other)),
        }
    }

    /// Booleans also accept the integers 0 and 1.
    fn boolean(&mut self) -> Result<bool> {
        match self.take("boolean")? {
            Arg::Boolean(b) => Ok(*b),
            Arg::Integer(0) => Ok(false),
            Arg::Integer(1) => Ok(true),
            other => Err(self.mismatch("boolean", other)),
        }
    }
}

impl Call {
    /// Build a call from an operation name and positional arguments.
    pub fn from_args(operation: &str, args: &[Arg]) -> Result<Self> {
        let arity = match operation {
            "allocate" | "release" | "close" | "size" | "last_error" => 1,
            "open_read_only" | "get" | "check" | "key_dump" => 2,
            "open" => 3,
            "set" => 4,
            _ => return Err(KvError::UnknownOperation(operation.to_string())),
        };

        let mut a = Args::new(operation, args, arity)?;
        let id = a.integer()?;

        let call = match operation {
            "allocate" => Call::Allocate { id },
            "release" => Call::Release { id },
            "close" => Call::Close { id },
            "size" => Call::Size { id },
            "last_error" => Call::LastError { id },
            "open_read_only" => Call::OpenReadOnly {
                id,
                path: PathBuf::from(a.text()?),
            },
            "get" => Call::Get { id, key: a.text()? },
            "check" => Call::Check { id, key: a.text()? },
            "key_dump" => Call::KeyDump {
                id,
                destination: PathBuf::from(a.text()?),
            },
            "open" => Call::Open {
                id,
                path: PathBuf::from(a.text()?),
                truncate: a.boolean()?,
            },
            "set" => Call::Set {
                id,
                key: a.text()?,
                value: a.text()?,
                overwrite: a.boolean()?,
            },
            _ => return Err(KvError::UnknownOperation(operation.to_string())),
        };

        Ok(call)
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Call::Allocate { .. } => "allocate",
            Call::Release { .. } => "release",
            Call::Open { .. } => "open",
            Call::OpenReadOnly { .. } => "open_read_only",
            Call::Close { .. } => "close",
            Call::Get { .. } => "get",
            Call::Check { .. } => "check",
            Call::Set { .. } => "set",
            Call::Size { .. } => "size",
            Call::KeyDump { .. } => "key_dump",
            Call::LastError { .. } => "last_error",
        }
    }

    pub fn id(&self) -> InstanceId {
        match self {
            Call::Allocate { id }
            | Call::Release { id }
            | Call::Open { id, .. }
            | Call::OpenReadOnly { id, .. }
            | Call::Close { id }
            | Call::Get { id, .. }
            | Call::Check { id, .. }
            | Call::Set { id, .. }
            | Call::Size { id }
            | Call::KeyDump { id, .. }
            | Call::LastError { id } => *id,
        }
    }
}

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Unit,
    /// `get`: absence is `found: false` with an empty value.
    Lookup { found: bool, value: String },
    Flag(bool),
    Count(u64),
    Diagnostic(String),
}

/// Run `call` against `registry`.
pub fn dispatch<E: StorageEngine>(registry: &mut Registry<E>, call: Call) -> Result<Reply> {
    debug!("dispatch {} on instance {}", call.operation(), call.id());

    let reply = match call {
        Call::Allocate { id } => {
            registry.allocate(id)?;
            Reply::Unit
        }
        Call::Release { id } => {
            registry.release(id);
            Reply::Unit
        }
        Call::Open { id, path, truncate } => {
            registry.resolve_mut(id)?.open(path, truncate)?;
            Reply::Unit
        }
        Call::OpenReadOnly { id, path } => {
            registry.resolve_mut(id)?.open_read_only(path)?;
            Reply::Unit
        }
        Call::Close { id } => {
            registry.close(id)?;
            Reply::Unit
        }
        Call::Get { id, key } => match registry.resolve_mut(id)?.get(key)? {
            Some(value) => Reply::Lookup {
                found: true,
                value: String::from_utf8_lossy(&value).into_owned(),
            },
            None => Reply::Lookup {
                found: false,
                value: String::new(),
            },
        },
        Call::Check { id, key } => Reply::Flag(registry.resolve_mut(id)?.check(key)?),
        Call::Set {
            id,
            key,
            value,
            overwrite,
        } => {
            let store = registry.resolve_mut(id)?;
            if overwrite {
                store.set(key, value)?;
                Reply::Flag(true)
            } else {
                Reply::Flag(store.add(key, value)?)
            }
        }
        Call::Size { id } => Reply::Count(registry.resolve_mut(id)?.size()?),
        Call::KeyDump { id, destination } => {
            Reply::Count(registry.resolve_mut(id)?.dump_keys(destination)?)
        }
        Call::LastError { id } => {
            Reply::Diagnostic(registry.resolve(id)?.describe_last_error().to_string())
        }
    };

    Ok(reply)
}
