//! Configuration Module
//!
//! Construction parameters for a cache instance and its backing database.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default cache file name.
pub const DEFAULT_FILENAME: &str = ".cache";

/// Timeout in seconds applied when an operation passes `None`.
pub const DEFAULT_TIMEOUT: i64 = 300;

/// How long a call waits for a contended database session before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning applied to every new session, before user-supplied pragmas.
const DEFAULT_PRAGMAS: &[(&str, &str)] = &[
    ("mmap_size", "67108864"),
    ("cache_size", "8192"),
    ("wal_autocheckpoint", "1000"),
    ("auto_vacuum", "none"),
    ("synchronous", "off"),
    ("journal_mode", "wal"),
    ("temp_store", "memory"),
];

/// Cache construction parameters.
///
/// Two caches built with the same `filename` and `path` address the same
/// backing table and share one database session within the process.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache file name
    pub filename: String,
    /// Directory for the cache file; current directory if `None`
    pub path: Option<PathBuf>,
    /// Keep rows in memory only; the file is still created for identity
    pub in_memory: bool,
    /// Bound on waiting for a contended session
    pub busy_timeout: Duration,
    /// Timeout in seconds used when an operation passes `None`
    pub default_timeout: i64,
    /// Extra PRAGMA settings forwarded verbatim to SQLite
    pub pragmas: Vec<(String, String)>,
}

impl CacheConfig {
    /// Creates a configuration with the defaults: `.cache` in the current
    /// directory, in-memory rows, a 5 second busy wait, and a 300 second
    /// default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache file name.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Sets the directory the cache file lives in.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Chooses between in-memory rows and durable on-disk rows.
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    /// Sets the bound on waiting for a contended session.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the timeout in seconds used when an operation passes `None`.
    /// Negative values make such writes never expire.
    pub fn default_timeout(mut self, timeout: i64) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Adds a PRAGMA setting forwarded verbatim to the database session.
    /// User pragmas are applied after the built-in tuning, so they win on
    /// conflict.
    pub fn pragma(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pragmas.push((key.into(), value.into()));
        self
    }

    /// Resolves the `(filename, path)` identity to a single database path.
    pub(crate) fn database_path(&self) -> Result<PathBuf> {
        if self.filename.is_empty() {
            return Err(CacheError::Configuration(
                "cache filename must not be empty".to_string(),
            ));
        }
        let dir = match &self.path {
            Some(path) => path.clone(),
            None => std::env::current_dir().map_err(|e| {
                CacheError::Configuration(format!("cannot resolve current directory: {e}"))
            })?,
        };
        Ok(dir.join(&self.filename))
    }

    /// Pragmas in application order: tuning defaults first, user overrides after.
    pub(crate) fn effective_pragmas(&self) -> impl Iterator<Item = (&str, &str)> {
        DEFAULT_PRAGMAS
            .iter()
            .copied()
            .chain(self.pragmas.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            filename: DEFAULT_FILENAME.to_string(),
            path: None,
            in_memory: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            pragmas: Vec::new(),
        }
    }
}
