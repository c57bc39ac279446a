//! One-shot subcommands against a single store file.

use anyhow::Result;
use kvlink::{dispatch, Call, InstanceId, Registry, Reply};
use std::io::Write;
use std::path::PathBuf;

/// Instance id used by one-shot commands.
const ONE_SHOT_ID: InstanceId = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { db: PathBuf, key: String },
    Check { db: PathBuf, key: String },
    Set {
        db: PathBuf,
        key: String,
        value: String,
        overwrite: bool,
        truncate: bool,
    },
    Size { db: PathBuf },
    Dump { db: PathBuf, destination: PathBuf },
}

impl Command {
    fn open_call(&self) -> Call {
        match self {
            Command::Set { db, truncate, .. } => Call::Open {
                id: ONE_SHOT_ID,
                path: db.clone(),
                truncate: *truncate,
            },
            Command::Get { db, .. }
            | Command::Check { db, .. }
            | Command::Size { db }
            | Command::Dump { db, .. } => Call::OpenReadOnly {
                id: ONE_SHOT_ID,
                path: db.clone(),
            },
        }
    }

    fn call(self) -> Call {
        let id = ONE_SHOT_ID;
        match self {
            Command::Get { key, .. } => Call::Get { id, key },
            Command::Check { key, .. } => Call::Check { id, key },
            Command::Set {
                key,
                value,
                overwrite,
                ..
            } => Call::Set {
                id,
                key,
                value,
                overwrite,
            },
            Command::Size { .. } => Call::Size { id },
            Command::Dump { destination, .. } => Call::KeyDump { id, destination },
        }
    }
}

/// Run `command` and print its result to `out`.
///
/// Returns `false` when the command succeeded with a negative outcome: a
/// missing key for `get`/`check`, or an existing key for `set --no-overwrite`.
pub fn run_command<W: Write>(command: Command, registry: &mut Registry, out: &mut W) -> Result<bool> {
    registry.allocate(ONE_SHOT_ID)?;
    let result = execute(command, registry);
    registry.release(ONE_SHOT_ID);

    match result? {
        Reply::Lookup { found, value } => {
            if found {
                writeln!(out, "{}", value)?;
            }
            Ok(found)
        }
        Reply::Flag(flag) => {
            writeln!(out, "{}", flag)?;
            Ok(flag)
        }
        Reply::Count(count) => {
            writeln!(out, "{}", count)?;
            Ok(true)
        }
        Reply::Diagnostic(message) => {
            writeln!(out, "{}", message)?;
            Ok(true)
        }
        Reply::Unit => Ok(true),
    }
}

fn execute(command: Command, registry: &mut Registry) -> Result<Reply> {
    dispatch(registry, command.open_call())?;
    let reply = dispatch(registry, command.call())?;
    dispatch(registry, Call::Close { id: ONE_SHOT_ID })?;
    Ok(reply)
}
