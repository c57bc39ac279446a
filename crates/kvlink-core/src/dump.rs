//! Key dump: write every key of a store to a newline-delimited text file.
//!
//! The destination itself is opened for writing, so symlinks, FIFOs and
//! devices receive the keys. Under the strict policy every key is checked
//! before the destination is opened, so an unrepresentable key leaves it
//! untouched.

use crate::config::{DumpConfig, DumpPolicy};
use crate::engine::StorageEngine;
use crate::error::{KvError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Why a key cannot be written as one line of the dump.
fn unrepresentable(key: &[u8]) -> Option<&'static str> {
    if key.contains(&DumpConfig::LINE_TERMINATOR) {
        Some("key contains a line terminator")
    } else if std::str::from_utf8(key).is_err() {
        Some("key is not valid UTF-8")
    } else {
        None
    }
}

fn dump_error(destination: &Path, message: String, source: Option<std::io::Error>) -> KvError {
    KvError::KeyDump {
        path: destination.to_path_buf(),
        message,
        source,
    }
}

fn rejected_key(destination: &Path, key: &[u8], reason: &str) -> KvError {
    dump_error(
        destination,
        format!("{}: {:?}", reason, String::from_utf8_lossy(key)),
        None,
    )
}

fn open_destination(destination: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
}

/// Write all keys of `engine` to `destination`, one per line, in the engine's
/// native order. Returns the number of keys written.
pub(crate) fn dump_keys<E: StorageEngine>(
    engine: &E,
    destination: &Path,
    policy: DumpPolicy,
) -> Result<u64> {
    if policy == DumpPolicy::Strict {
        engine.scan_keys(&mut |key| match unrepresentable(key) {
            Some(reason) => Err(rejected_key(destination, key, reason)),
            None => Ok(()),
        })?;
    }

    let file = match open_destination(destination) {
        Ok(file) => file,
        Err(e) => {
            return match policy {
                DumpPolicy::Strict => Err(dump_error(
                    destination,
                    format!("cannot open destination for writing: {}", e),
                    Some(e),
                )),
                DumpPolicy::Lenient => {
                    warn!(
                        "Cannot open key dump destination {}: {}; no keys written",
                        destination.display(),
                        e
                    );
                    Ok(0)
                }
            };
        }
    };

    let mut writer = BufWriter::with_capacity(DumpConfig::WRITE_BUFFER_BYTES, file);
    let mut written = 0u64;
    let mut skipped = 0u64;

    engine.scan_keys(&mut |key| {
        if let Some(reason) = unrepresentable(key) {
            if policy == DumpPolicy::Strict {
                return Err(rejected_key(destination, key, reason));
            }
            warn!(
                "Skipping key {:?} in dump: {}",
                String::from_utf8_lossy(key),
                reason
            );
            skipped += 1;
            return Ok(());
        }

        writer
            .write_all(key)
            .and_then(|_| writer.write_all(&[DumpConfig::LINE_TERMINATOR]))
            .map_err(|e| dump_error(destination, format!("write failed: {}", e), Some(e)))?;
        written += 1;
        Ok(())
    })?;

    let file = writer.into_inner().map_err(|e| {
        let message = format!("flush failed: {}", e.error());
        dump_error(destination, message, Some(e.into_error()))
    })?;

    // Pipes and character devices cannot be synced.
    if file.metadata().map(|m| m.is_file()).unwrap_or(false) {
        file.sync_all()
            .map_err(|e| dump_error(destination, format!("sync failed: {}", e), Some(e)))?;
    }

    debug!(
        "Dumped {} keys to {} ({} skipped)",
        written,
        destination.display(),
        skipped
    );
    Ok(written)
}
