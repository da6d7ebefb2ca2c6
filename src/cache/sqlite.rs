//! SQLite Store Adapter Module
//!
//! Owns the single database session for one cache identity and exposes
//! the record-level primitives the engine is built on. Every operation
//! against an identity funnels through this session; the conditional
//! statements lean on SQLite's conflict handling so check-then-act pairs
//! have no externally visible gap.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use crate::cache::expiry::Record;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == SQL Statements ==
// `expires_at = -1` is the reserved never-expires sentinel.
const CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS cache (\
     key TEXT PRIMARY KEY, value BLOB NOT NULL, expires_at INTEGER NOT NULL);";

const UPSERT_SQL: &str = "INSERT INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at;";

const INSERT_IF_STALE_SQL: &str = "INSERT INTO cache (key, value, expires_at) VALUES (?1, ?2, ?3) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at \
     WHERE cache.expires_at <> -1 AND cache.expires_at <= ?4;";

const UPDATE_IF_LIVE_SQL: &str =
    "UPDATE cache SET value = ?2 WHERE key = ?1 AND (expires_at = -1 OR expires_at > ?3);";

const TOUCH_IF_LIVE_SQL: &str =
    "UPDATE cache SET expires_at = ?2 WHERE key = ?1 AND (expires_at = -1 OR expires_at > ?3);";

const SELECT_ONE_SQL: &str = "SELECT key, value, expires_at FROM cache WHERE key = ?1;";
const SELECT_KEYS_SQL: &str = "SELECT key, expires_at FROM cache ORDER BY key ASC;";
const SELECT_KEYS_LIKE_SQL: &str =
    "SELECT key, expires_at FROM cache WHERE key LIKE ?1 ORDER BY key ASC;";

const DELETE_ONE_SQL: &str = "DELETE FROM cache WHERE key = ?1;";
const DELETE_LIKE_SQL: &str = "DELETE FROM cache WHERE key LIKE ?1;";
const DELETE_ALL_SQL: &str = "DELETE FROM cache;";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM cache;";

// == SQLite Store ==
/// Store adapter owning the single SQLite session for one cache identity.
///
/// The session lives behind a mutex, so the adapter is shareable across
/// threads; it closes when the adapter is dropped, or earlier via
/// [`SqliteStore::close`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    // == Open ==
    /// Opens the database for the given configuration, creating the file
    /// and the schema if they do not exist yet. An existing table is
    /// never truncated here.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let path = config.database_path()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Configuration(format!(
                        "cannot create cache directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        tracing::info!(path = %path.display(), in_memory = config.in_memory, "opening cache database");

        let conn = if config.in_memory {
            // The file is still created so identity and locking behave
            // like the durable mode; rows only ever live in memory.
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| {
                    CacheError::Configuration(format!(
                        "cannot create cache file {}: {e}",
                        path.display()
                    ))
                })?;
            let uri = format!("file:{}?mode=memory&cache=shared", path.display());
            Connection::open_with_flags(uri, OpenFlags::default())?
        } else {
            Connection::open(&path)?
        };

        conn.busy_timeout(config.busy_timeout)?;

        for (key, value) in config.effective_pragmas() {
            apply_pragma(&conn, key, value)?;
        }

        conn.execute_batch(CREATE_SQL)?;
        tracing::debug!(path = %path.display(), "cache schema ready");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    /// Runs a closure against the open session.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(CacheError::Configuration(
                "cache session is closed".to_string(),
            )),
        }
    }

    // == Writes ==
    /// Unconditionally inserts or replaces the given records.
    pub fn upsert(&self, records: &[Record]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(UPSERT_SQL)?;
                for record in records {
                    stmt.execute(params![record.key, record.value, record.expires_at])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Inserts records, replacing an existing row only when that row is
    /// stale at `now`. Returns how many records were applied. The check
    /// and the write are one conflict-aware statement per record.
    pub fn conditional_insert(&self, records: &[Record], now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut applied = 0;
            {
                let mut stmt = tx.prepare(INSERT_IF_STALE_SQL)?;
                for record in records {
                    applied +=
                        stmt.execute(params![record.key, record.value, record.expires_at, now])?;
                }
            }
            tx.commit()?;
            Ok(applied)
        })
    }

    /// Replaces the value of rows that are present and live at `now`,
    /// leaving their expiry untouched. Returns how many rows changed.
    pub fn conditional_update(&self, updates: &[(String, Vec<u8>)], now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut applied = 0;
            {
                let mut stmt = tx.prepare(UPDATE_IF_LIVE_SQL)?;
                for (key, value) in updates {
                    applied += stmt.execute(params![key, value, now])?;
                }
            }
            tx.commit()?;
            Ok(applied)
        })
    }

    /// Replaces the expiry of rows that are present and live at `now`.
    /// Returns how many rows changed.
    pub fn conditional_touch(&self, keys: &[&str], expires_at: i64, now: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let mut applied = 0;
            {
                let mut stmt = tx.prepare(TOUCH_IF_LIVE_SQL)?;
                for key in keys {
                    applied += stmt.execute(params![key, expires_at, now])?;
                }
            }
            tx.commit()?;
            Ok(applied)
        })
    }

    // == Reads ==
    /// Fetches the record under `key`, live or stale.
    pub fn select_one(&self, key: &str) -> Result<Option<Record>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_ONE_SQL)?;
            let mut rows = stmt.query(params![key])?;
            match rows.next()? {
                Some(row) => Ok(Some(Record {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    expires_at: row.get(2)?,
                })),
                None => Ok(None),
            }
        })
    }

    /// Fetches every record stored under the given keys, live or stale.
    pub fn select_many(&self, keys: &[&str]) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; keys.len()].join(", ");
            let sql =
                format!("SELECT key, value, expires_at FROM cache WHERE key IN ({placeholders});");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(keys.iter()), |row| {
                Ok(Record {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            })?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
    }

    /// Every stored key with its expiry, in sort order.
    pub fn select_keys(&self) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_KEYS_SQL)?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
    }

    /// Stored keys matching a SQL `LIKE` pattern, with expiries, in sort
    /// order.
    pub fn select_keys_like(&self, pattern: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(SELECT_KEYS_LIKE_SQL)?;
            let rows = stmt.query_map(params![pattern], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut keys = Vec::new();
            for row in rows {
                keys.push(row?);
            }
            Ok(keys)
        })
    }

    /// Number of stored rows, stale rows included.
    pub fn count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(COUNT_SQL, [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    // == Deletes ==
    /// Removes one row. Returns whether a row was removed.
    pub fn delete_one(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute(DELETE_ONE_SQL, params![key])? > 0))
    }

    /// Removes every row under the given keys. Returns how many were
    /// removed.
    pub fn delete_many(&self, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let placeholders = vec!["?"; keys.len()].join(", ");
            let sql = format!("DELETE FROM cache WHERE key IN ({placeholders});");
            Ok(conn.execute(&sql, params_from_iter(keys.iter()))?)
        })
    }

    /// Removes every row whose key matches a SQL `LIKE` pattern.
    pub fn delete_like(&self, pattern: &str) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute(DELETE_LIKE_SQL, params![pattern])?))
    }

    /// Removes every row.
    pub fn delete_all(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(DELETE_ALL_SQL, [])?;
            Ok(())
        })
    }

    // == Close ==
    /// Closes the session. Safe to call more than once; operations after
    /// the close report a configuration error.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = guard.take() {
            run_pragma(&conn, "PRAGMA optimize;")?;
            conn.close().map_err(|(_, e)| CacheError::from(e))?;
            tracing::debug!(path = %self.path.display(), "cache session closed");
        }
        Ok(())
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            tracing::warn!(%error, "failed to close cache session cleanly");
        }
    }
}

// == Pragma Helpers ==
/// Applies one PRAGMA setting, value forwarded verbatim.
fn apply_pragma(conn: &Connection, key: &str, value: &str) -> Result<()> {
    run_pragma(conn, &format!("PRAGMA {key}={value};"))
}

/// Runs a PRAGMA statement, draining any row it reports back.
fn run_pragma(conn: &Connection, sql: &str) -> Result<()> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    while rows.next()?.is_some() {}
    Ok(())
}
