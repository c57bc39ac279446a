//! SQLite-backed storage engine.

use super::{OpenMode, StorageEngine};
use crate::config::{EngineConfig, EngineOptions, JournalMode};
use crate::error::{EngineErrorKind, KvError, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Single-file SQLite store holding opaque byte records.
///
/// Records live in a `WITHOUT ROWID` table keyed by the raw key bytes. The
/// record count is kept in a metadata row and updated in the same
/// transaction as every insert, so [`StorageEngine::count`] never scans.
pub struct SqliteEngine {
    conn: Connection,
    path: PathBuf,
    mode: OpenMode,
    journal_mode: JournalMode,
}

impl SqliteEngine {
    fn open_writer(path: &Path, options: &EngineOptions) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| KvError::engine_open(path, e))?;

        Self::reject_foreign_schema(&conn, path)?;
        Self::configure_connection(&conn, options).map_err(|e| KvError::engine_open(path, e))?;
        Self::ensure_schema(&conn).map_err(|e| KvError::engine_open(path, e))?;
        Self::check_format(&conn, path)?;

        Ok(conn)
    }

    fn open_reader(path: &Path, options: &EngineOptions) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|e| KvError::engine_open(path, e))?;

        conn.busy_timeout(options.busy_timeout())
            .map_err(|e| KvError::engine_open(path, e))?;
        Self::check_format(&conn, path)?;

        Ok(conn)
    }

    fn configure_connection(conn: &Connection, options: &EngineOptions) -> rusqlite::Result<()> {
        conn.busy_timeout(options.busy_timeout())?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode={};\n\
             PRAGMA synchronous={};",
            options.journal_mode.pragma_value(),
            options.sync_mode.pragma_value(),
        ))
    }

    fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_entries (
                key BLOB PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            ) WITHOUT ROWID;

            CREATE TABLE IF NOT EXISTS kv_meta (
                name TEXT PRIMARY KEY NOT NULL,
                value INTEGER NOT NULL
            );",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO kv_meta (name, value) VALUES (?1, ?2)",
            params![EngineConfig::META_FORMAT_VERSION, EngineConfig::FORMAT_VERSION],
        )?;

        // Seed the counter from the table itself the first time it is created.
        conn.execute(
            "INSERT OR IGNORE INTO kv_meta (name, value)
             SELECT ?1, COUNT(*) FROM kv_entries",
            params![EngineConfig::META_RECORD_COUNT],
        )?;

        Ok(())
    }

    /// Refuse to add the store schema to a database that already holds
    /// other tables.
    fn reject_foreign_schema(conn: &Connection, path: &Path) -> Result<()> {
        let (tables, meta_tables): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(CASE WHEN name = 'kv_meta' THEN 1 END)
                 FROM sqlite_master WHERE type = 'table'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| KvError::engine_open(path, e))?;

        if tables > 0 && meta_tables == 0 {
            return Err(KvError::EngineOpen {
                path: path.to_path_buf(),
                kind: EngineErrorKind::BrokenFile,
                message: format!("not a store: database already has {} foreign tables", tables),
                source: None,
            });
        }
        Ok(())
    }

    /// Reject files that are not stores of this engine's format.
    fn check_format(conn: &Connection, path: &Path) -> Result<()> {
        let version: rusqlite::Result<Option<i64>> = conn
            .query_row(
                "SELECT value FROM kv_meta WHERE name = ?1",
                params![EngineConfig::META_FORMAT_VERSION],
                |row| row.get(0),
            )
            .optional();

        let broken = |message: String| KvError::EngineOpen {
            path: path.to_path_buf(),
            kind: EngineErrorKind::BrokenFile,
            message,
            source: None,
        };

        match version {
            Ok(Some(v)) if v == EngineConfig::FORMAT_VERSION => Ok(()),
            Ok(Some(v)) => Err(broken(format!("unsupported store format version {}", v))),
            Ok(None) => Err(broken("store format version missing".to_string())),
            Err(e) => {
                let kind = match EngineErrorKind::from_sqlite(&e) {
                    EngineErrorKind::Misc => EngineErrorKind::BrokenFile,
                    kind => kind,
                };
                Err(KvError::EngineOpen {
                    path: path.to_path_buf(),
                    kind,
                    message: format!("not a valid store: {}", e),
                    source: Some(e),
                })
            }
        }
    }

    /// Discard every record. Runs once, as part of a truncating open.
    fn truncate(&mut self) -> Result<()> {
        let path = self.path.clone();
        let tx = self
            .conn
            .transaction()
            .map_err(|e| KvError::engine_open(&path, e))?;

        let removed = tx
            .execute("DELETE FROM kv_entries", [])
            .map_err(|e| KvError::engine_open(&path, e))?;
        tx.execute(
            "UPDATE kv_meta SET value = 0 WHERE name = ?1",
            params![EngineConfig::META_RECORD_COUNT],
        )
        .map_err(|e| KvError::engine_open(&path, e))?;

        tx.commit().map_err(|e| KvError::engine_open(&path, e))?;

        info!("Truncated store at {}: {} records discarded", path.display(), removed);
        Ok(())
    }

    fn bump_count(tx: &rusqlite::Transaction<'_>) -> rusqlite::Result<usize> {
        tx.execute(
            "UPDATE kv_meta SET value = value + 1 WHERE name = ?1",
            params![EngineConfig::META_RECORD_COUNT],
        )
    }
}

impl StorageEngine for SqliteEngine {
    fn open(path: &Path, mode: OpenMode, options: &EngineOptions) -> Result<Self> {
        let conn = match mode {
            OpenMode::Writer { .. } => Self::open_writer(path, options)?,
            OpenMode::Reader => Self::open_reader(path, options)?,
        };

        let mut engine = Self {
            conn,
            path: path.to_path_buf(),
            mode,
            journal_mode: options.journal_mode,
        };

        if let OpenMode::Writer { truncate: true } = mode {
            engine.truncate()?;
        }

        debug!("Opened store at {} ({:?})", path.display(), mode);
        Ok(engine)
    }

    fn close(self) -> Result<()> {
        let SqliteEngine {
            conn,
            path,
            mode,
            journal_mode,
        } = self;

        // Leave the file in rollback-journal mode so read-only handles can
        // open it without creating WAL side files.
        if mode.is_writer() && journal_mode == JournalMode::Wal {
            let reset = format!("PRAGMA journal_mode={}", JournalMode::Delete.pragma_value());
            if let Err(e) = conn.query_row(&reset, [], |_| Ok(())) {
                warn!("WAL checkpoint failed for {}: {}", path.display(), e);
            }
        }

        conn.close().map_err(|(_conn, e)| KvError::Close {
            kind: EngineErrorKind::from_sqlite(&e),
            message: format!("{}: {}", path.display(), e),
            source: Some(e),
        })?;

        debug!("Closed store at {}", path.display());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KvError::engine_io("get", e))
    }

    fn value_size(&self, key: &[u8]) -> Result<i64> {
        let size: Option<i64> = self
            .conn
            .query_row(
                "SELECT length(value) FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KvError::engine_io("check", e))?;

        Ok(size.unwrap_or(-1))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| KvError::engine_io("set", e))?;

        let existed = tx
            .query_row(
                "SELECT 1 FROM kv_entries WHERE key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| KvError::engine_io("set", e))?
            .is_some();

        tx.execute(
            "INSERT INTO kv_entries (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| KvError::engine_io("set", e))?;

        if !existed {
            Self::bump_count(&tx).map_err(|e| KvError::engine_io("set", e))?;
        }

        tx.commit().map_err(|e| KvError::engine_io("set", e))
    }

    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| KvError::engine_io("add", e))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO kv_entries (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| KvError::engine_io("add", e))?
            > 0;

        if inserted {
            Self::bump_count(&tx).map_err(|e| KvError::engine_io("add", e))?;
        }

        tx.commit().map_err(|e| KvError::engine_io("add", e))?;
        Ok(inserted)
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT value FROM kv_meta WHERE name = ?1",
                params![EngineConfig::META_RECORD_COUNT],
                |row| row.get(0),
            )
            .map_err(|e| KvError::engine_io("size", e))?;

        Ok(count.max(0) as u64)
    }

    fn scan_keys(&self, visit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM kv_entries")
            .map_err(|e| KvError::engine_io("key_dump", e))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| KvError::engine_io("key_dump", e))?;

        while let Some(row) = rows.next().map_err(|e| KvError::engine_io("key_dump", e))? {
            let key: Vec<u8> = row.get(0).map_err(|e| KvError::engine_io("key_dump", e))?;
            visit(&key)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn writer(truncate: bool) -> OpenMode {
        OpenMode::Writer { truncate }
    }

    fn create_test_engine() -> (TempDir, SqliteEngine) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.kvdb");
        let engine =
            SqliteEngine::open(&db_path, writer(false), &EngineOptions::default()).unwrap();
        (temp_dir, engine)
    }

    fn collect_keys(engine: &SqliteEngine) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        engine
            .scan_keys(&mut |key| {
                keys.push(key.to_vec());
                Ok(())
            })
            .unwrap();
        keys
    }

    #[test]
    fn test_set_and_get() {
        let (_temp, mut engine) = create_test_engine();

        engine.set(b"key1", b"hello world").unwrap();

        assert_eq!(engine.get(b"key1").unwrap().unwrap(), b"hello world");
        assert!(engine.get(b"missing").unwrap().is_none());
    }

    #[test]
    fn test_set_replaces_without_recounting() {
        let (_temp, mut engine) = create_test_engine();

        engine.set(b"k", b"v1").unwrap();
        engine.set(b"k", b"v2").unwrap();

        assert_eq!(engine.get(b"k").unwrap().unwrap(), b"v2");
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[test]
    fn test_add_keeps_existing() {
        let (_temp, mut engine) = create_test_engine();

        assert!(engine.add(b"k", b"first").unwrap());
        assert!(!engine.add(b"k", b"second").unwrap());

        assert_eq!(engine.get(b"k").unwrap().unwrap(), b"first");
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[test]
    fn test_value_size_sentinel() {
        let (_temp, mut engine) = create_test_engine();

        engine.set(b"k", b"12345").unwrap();
        engine.set(b"empty", b"").unwrap();

        assert_eq!(engine.value_size(b"k").unwrap(), 5);
        assert_eq!(engine.value_size(b"empty").unwrap(), 0);
        assert!(engine.value_size(b"missing").unwrap() < 0);
    }

    #[test]
    fn test_empty_key_is_a_record() {
        let (_temp, mut engine) = create_test_engine();

        engine.set(b"", b"root").unwrap();

        assert_eq!(engine.get(b"").unwrap().unwrap(), b"root");
        assert_eq!(engine.count().unwrap(), 1);
    }

    #[test]
    fn test_reopen_preserves_and_truncate_wipes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("persist.kvdb");
        let options = EngineOptions::default();

        let mut engine = SqliteEngine::open(&db_path, writer(false), &options).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();
        engine.close().unwrap();

        let engine = SqliteEngine::open(&db_path, writer(false), &options).unwrap();
        assert_eq!(engine.count().unwrap(), 2);
        assert_eq!(engine.get(b"b").unwrap().unwrap(), b"2");
        engine.close().unwrap();

        let engine = SqliteEngine::open(&db_path, writer(true), &options).unwrap();
        assert_eq!(engine.count().unwrap(), 0);
        assert!(engine.get(b"a").unwrap().is_none());
        engine.close().unwrap();
    }

    #[test]
    fn test_reader_sees_records_and_refuses_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("ro.kvdb");
        let options = EngineOptions::default();

        let mut engine = SqliteEngine::open(&db_path, writer(false), &options).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.close().unwrap();

        let mut reader = SqliteEngine::open(&db_path, OpenMode::Reader, &options).unwrap();
        assert_eq!(reader.count().unwrap(), 1);
        assert_eq!(reader.get(b"a").unwrap().unwrap(), b"1");

        let err = reader.set(b"b", b"2").unwrap_err();
        assert!(matches!(err, KvError::EngineIo { .. }));
        reader.close().unwrap();
    }

    #[test]
    fn test_reader_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("absent.kvdb");

        let err = SqliteEngine::open(&db_path, OpenMode::Reader, &EngineOptions::default())
            .err()
            .unwrap();

        match err {
            KvError::EngineOpen { kind, .. } => assert_eq!(kind, EngineErrorKind::NoRepository),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!db_path.exists());
    }

    #[test]
    fn test_reader_rejects_foreign_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("notes.txt");
        std::fs::write(&db_path, "this is not a key-value store, just some text\n".repeat(20))
            .unwrap();

        let err = SqliteEngine::open(&db_path, OpenMode::Reader, &EngineOptions::default())
            .err()
            .unwrap();

        match err {
            KvError::EngineOpen { kind, .. } => assert_eq!(kind, EngineErrorKind::BrokenFile),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_reader_rejects_foreign_sqlite_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("other.sqlite");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch("CREATE TABLE unrelated (id INTEGER PRIMARY KEY);")
            .unwrap();
        drop(conn);

        let err = SqliteEngine::open(&db_path, OpenMode::Reader, &EngineOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            KvError::EngineOpen {
                kind: EngineErrorKind::BrokenFile,
                ..
            }
        ));
    }

    #[test]
    fn test_writer_rejects_foreign_sqlite_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("app.sqlite");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        drop(conn);

        for truncate in [false, true] {
            let err = SqliteEngine::open(&db_path, writer(truncate), &EngineOptions::default())
                .err()
                .unwrap();
            assert!(matches!(
                err,
                KvError::EngineOpen {
                    kind: EngineErrorKind::BrokenFile,
                    ..
                }
            ));
        }

        let conn = Connection::open(&db_path).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(tables, vec!["users".to_string()]);
    }

    #[test]
    fn test_writer_in_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("no/such/dir/store.kvdb");

        let err = SqliteEngine::open(&db_path, writer(false), &EngineOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            KvError::EngineOpen {
                kind: EngineErrorKind::NoRepository,
                ..
            }
        ));
    }

    #[test]
    fn test_scan_visits_every_key_once() {
        let (_temp, mut engine) = create_test_engine();

        for key in ["delta", "alpha", "charlie", "bravo"] {
            engine.set(key.as_bytes(), b"x").unwrap();
        }
        engine.add(b"alpha", b"y").unwrap();

        let mut keys = collect_keys(&engine);
        assert_eq!(keys.len() as u64, engine.count().unwrap());

        keys.sort();
        assert_eq!(
            keys,
            vec![
                b"alpha".to_vec(),
                b"bravo".to_vec(),
                b"charlie".to_vec(),
                b"delta".to_vec()
            ]
        );
    }

    #[test]
    fn test_scan_stops_on_visitor_error() {
        let (_temp, mut engine) = create_test_engine();
        engine.set(b"a", b"1").unwrap();
        engine.set(b"b", b"2").unwrap();

        let mut seen = 0;
        let result = engine.scan_keys(&mut |_| {
            seen += 1;
            Err(KvError::UnknownOperation("stop".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_wal_mode_close_checkpoints() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("wal.kvdb");
        let options = EngineOptions {
            journal_mode: JournalMode::Wal,
            ..EngineOptions::default()
        };

        let mut engine = SqliteEngine::open(&db_path, writer(false), &options).unwrap();
        engine.set(b"a", b"1").unwrap();
        engine.close().unwrap();

        assert!(!temp_dir.path().join("wal.kvdb-wal").exists());

        let engine =
            SqliteEngine::open(&db_path, OpenMode::Reader, &EngineOptions::default()).unwrap();
        assert_eq!(engine.get(b"a").unwrap().unwrap(), b"1");
        engine.close().unwrap();
    }
}
