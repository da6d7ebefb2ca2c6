//! Instance Registry Module
//!
//! Maps a cache identity (the resolved database path) to its shared store
//! session, so every engine pointed at the same location funnels through
//! one connection instead of contending with its own.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;

use crate::cache::sqlite::SqliteStore;
use crate::config::CacheConfig;
use crate::error::Result;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// The process-wide registry used by [`crate::Cache::open`].
pub(crate) fn global() -> &'static Registry {
    &GLOBAL
}

// == Registry ==
/// Table of shared store sessions, keyed by database path.
///
/// Entries hold the session weakly: the session closes when the last
/// engine drops its handle, and the dead entry is purged on the next
/// lookup. Constructors can inject their own registry instead of the
/// process-wide one.
#[derive(Debug, Default)]
pub struct Registry {
    stores: Mutex<HashMap<PathBuf, Weak<SqliteStore>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live session for the configured identity, opening a
    /// new one if no engine currently holds it.
    pub fn acquire(&self, config: &CacheConfig) -> Result<Arc<SqliteStore>> {
        let path = config.database_path()?;
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        stores.retain(|_, store| store.strong_count() > 0);

        if let Some(store) = stores.get(&path).and_then(Weak::upgrade) {
            tracing::debug!(path = %path.display(), "reusing shared cache session");
            return Ok(store);
        }

        let store = Arc::new(SqliteStore::open(config)?);
        stores.insert(path, Arc::downgrade(&store));
        Ok(store)
    }

    /// Number of identities with a live session.
    pub fn live_sessions(&self) -> usize {
        let stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        stores.values().filter(|s| s.strong_count() > 0).count()
    }
}
