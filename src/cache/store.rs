//! Cache Engine Module
//!
//! The public cache type. Every operation is expressed through the store
//! adapter, the expiry policy, and the value codec; read paths that
//! observe an expired row remove it on the spot.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::codec::{Codec, JsonCodec};
use crate::cache::expiry::{self, Record, TTL_MISSING};
use crate::cache::registry::{self, Registry};
use crate::cache::sqlite::SqliteStore;
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Cache ==
/// Persistent key-value cache backed by SQLite.
///
/// Engines constructed with the same filename and path observe the same
/// table and share one database session through a [`Registry`]; opening
/// a second engine never clears what the first one wrote. The session
/// closes when the last engine for the identity goes away, so dropping
/// the engine is the scoped-release equivalent of [`Cache::close`].
///
/// All operations take `&self` and the engine is `Send + Sync`.
#[derive(Debug)]
pub struct Cache<C: Codec = JsonCodec> {
    store: Arc<SqliteStore>,
    codec: C,
    default_timeout: i64,
    stats: StatsRecorder,
}

impl Cache<JsonCodec> {
    /// Opens a cache through the process-wide registry.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_in(registry::global(), config)
    }

    /// Opens a cache through the given registry.
    pub fn open_in(registry: &Registry, config: CacheConfig) -> Result<Self> {
        Self::open_with_codec(registry, config, JsonCodec)
    }
}

impl<C: Codec> Cache<C> {
    /// Opens a cache with a custom value codec.
    pub fn open_with_codec(registry: &Registry, config: CacheConfig, codec: C) -> Result<Self> {
        let store = registry.acquire(&config)?;
        Ok(Self {
            store,
            codec,
            default_timeout: config.default_timeout,
            stats: StatsRecorder::default(),
        })
    }

    /// Absolute expiry for a requested timeout, `None` meaning the
    /// configured default.
    fn expires_at(&self, timeout: Option<i64>, now: i64) -> i64 {
        expiry::to_absolute(timeout.unwrap_or(self.default_timeout), now)
    }

    /// Removes a row observed stale. Failure degrades to the row staying
    /// behind until the next observation; it never reaches the caller.
    fn evict_stale(&self, key: &str) {
        match self.store.delete_one(key) {
            Ok(true) => self.stats.record_expirations(1),
            Ok(false) => {}
            Err(error) => tracing::warn!(key, %error, "failed to remove expired cache row"),
        }
    }

    /// Bulk form of [`Cache::evict_stale`].
    fn evict_stale_many(&self, keys: &[&str]) {
        match self.store.delete_many(keys) {
            Ok(removed) => self.stats.record_expirations(removed as u64),
            Err(error) => tracing::warn!(%error, "failed to remove expired cache rows"),
        }
    }

    // == Get ==
    /// Returns the value under `key`, or `None` if the key is absent or
    /// expired. An expired row observed here is removed.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let now = expiry::now();
        match self.store.select_one(key)? {
            Some(record) if record.is_live(now) => {
                let value = self.codec.decode(&record.value)?;
                self.stats.record_hit();
                Ok(Some(value))
            }
            Some(_) => {
                self.evict_stale(key);
                self.stats.record_miss();
                Ok(None)
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Returns the value under `key`, or `default` if the key is absent
    /// or expired.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    // == Fetch ==
    /// Like [`Cache::get`], but for callers that expect the key to be
    /// present: an absent or expired key is a [`CacheError::NotFound`].
    pub fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    // == Contains ==
    /// Whether a live record exists under `key`, with the same lazy
    /// eviction as [`Cache::get`].
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        let now = expiry::now();
        match self.store.select_one(key)? {
            Some(record) if record.is_live(now) => Ok(true),
            Some(_) => {
                self.evict_stale(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    // == TTL ==
    /// Seconds until `key` expires. Returns `-1` if the record never
    /// expires and `-2` if the key is absent or expired.
    pub fn ttl(&self, key: &str) -> Result<i64> {
        let now = expiry::now();
        match self.store.select_one(key)? {
            Some(record) => {
                let remaining = record.remaining(now);
                if remaining == TTL_MISSING {
                    self.evict_stale(key);
                }
                Ok(remaining)
            }
            None => Ok(TTL_MISSING),
        }
    }

    // == Set ==
    /// Stores `value` under `key`, replacing any existing record.
    ///
    /// `timeout` is in seconds; `None` uses the configured default, a
    /// negative value keeps the key until it is removed by hand, and `0`
    /// expires it immediately.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        timeout: Option<i64>,
    ) -> Result<()> {
        let now = expiry::now();
        let record = Record::new(key, self.codec.encode(value)?, self.expires_at(timeout, now));
        self.store.upsert(std::slice::from_ref(&record))
    }

    // == Add ==
    /// Stores `value` only if `key` is absent or its record has expired.
    /// Returns whether the value was stored.
    ///
    /// The liveness check and the write are one conflict-aware statement,
    /// so two racing writers cannot both believe they won.
    pub fn add<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        timeout: Option<i64>,
    ) -> Result<bool> {
        let now = expiry::now();
        let record = Record::new(key, self.codec.encode(value)?, self.expires_at(timeout, now));
        Ok(self
            .store
            .conditional_insert(std::slice::from_ref(&record), now)?
            > 0)
    }

    // == Update ==
    /// Replaces only the value of an existing live record, leaving its
    /// expiry untouched. Absent and expired keys are left alone; returns
    /// whether a record changed.
    pub fn update<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let now = expiry::now();
        let update = (key.to_string(), self.codec.encode(value)?);
        Ok(self
            .store
            .conditional_update(std::slice::from_ref(&update), now)?
            > 0)
    }

    // == Touch ==
    /// Extends the lifetime of an existing live record without touching
    /// its value. Absent and expired keys are left alone; returns whether
    /// a record changed.
    pub fn touch(&self, key: &str, timeout: Option<i64>) -> Result<bool> {
        let now = expiry::now();
        let expires_at = self.expires_at(timeout, now);
        Ok(self.store.conditional_touch(&[key], expires_at, now)? > 0)
    }

    // == Delete ==
    /// Removes `key`. Returns whether a record existed; a missing key is
    /// not an error.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.store.delete_one(key)
    }

    // == Get Or Set ==
    /// Returns the live value under `key`, or stores `default` with
    /// [`Cache::add`] semantics and returns it.
    pub fn get_or_set<T>(&self, key: &str, default: T, timeout: Option<i64>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let now = expiry::now();
        match self.store.select_one(key)? {
            Some(record) if record.is_live(now) => {
                let value = self.codec.decode(&record.value)?;
                self.stats.record_hit();
                return Ok(value);
            }
            Some(_) => self.evict_stale(key),
            None => {}
        }
        self.stats.record_miss();

        let record = Record::new(key, self.codec.encode(&default)?, self.expires_at(timeout, now));
        self.store
            .conditional_insert(std::slice::from_ref(&record), now)?;
        Ok(default)
    }

    // == Incr / Decr ==
    /// Adds `delta` to the integer stored under `key` and returns the new
    /// value, keeping the record's expiry.
    ///
    /// The read and the write are two separate statements: concurrent
    /// callers against the same key may interleave and lose an update.
    /// Callers that need an exact counter need coordination of their own.
    pub fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let now = expiry::now();
        let record = match self.store.select_one(key)? {
            Some(record) if record.is_live(now) => record,
            Some(_) => {
                self.evict_stale(key);
                return Err(CacheError::TypeMismatch(format!(
                    "nonexistent or expired cache key: {key}"
                )));
            }
            None => {
                return Err(CacheError::TypeMismatch(format!(
                    "nonexistent or expired cache key: {key}"
                )))
            }
        };

        let value: i64 = self.codec.decode(&record.value).map_err(|_| {
            CacheError::TypeMismatch(format!("value under key is not an integer: {key}"))
        })?;
        let new_value = value.checked_add(delta).ok_or_else(|| {
            CacheError::TypeMismatch(format!("counter overflow for key: {key}"))
        })?;

        let update = (record.key, self.codec.encode(&new_value)?);
        self.store
            .conditional_update(std::slice::from_ref(&update), now)?;
        Ok(new_value)
    }

    /// Subtracts `delta` from the integer stored under `key`. Shares
    /// [`Cache::incr`]'s semantics, non-atomicity included.
    pub fn decr(&self, key: &str, delta: i64) -> Result<i64> {
        let negated = delta.checked_neg().ok_or_else(|| {
            CacheError::TypeMismatch(format!("counter overflow for key: {key}"))
        })?;
        self.incr(key, negated)
    }

    // == Clear ==
    /// Removes every record, never-expiring ones included.
    pub fn clear(&self) -> Result<()> {
        tracing::info!("clearing cache");
        self.store.delete_all()
    }

    // == Get Many ==
    /// Fetches all live values among `keys`. Absent and expired keys are
    /// omitted from the result; expired rows observed by the call are
    /// removed in one sweep.
    pub fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, T>> {
        let now = expiry::now();
        let records = self.store.select_many(keys)?;

        let mut results = HashMap::with_capacity(records.len());
        let mut stale: Vec<String> = Vec::new();
        for record in records {
            if record.is_live(now) {
                let value = self.codec.decode(&record.value)?;
                results.insert(record.key, value);
            } else {
                stale.push(record.key);
            }
        }

        self.stats.record_hits(results.len() as u64);
        self.stats.record_misses((keys.len() - results.len()) as u64);
        if !stale.is_empty() {
            let refs: Vec<&str> = stale.iter().map(String::as_str).collect();
            self.evict_stale_many(&refs);
        }
        Ok(results)
    }

    // == Set Many ==
    /// Stores every `(key, value)` pair, replacing existing records. All
    /// values are encoded before anything is written, so an encoding
    /// error leaves the cache untouched.
    pub fn set_many<T: Serialize>(&self, items: &[(&str, T)], timeout: Option<i64>) -> Result<()> {
        let now = expiry::now();
        let records = self.encode_records(items, self.expires_at(timeout, now))?;
        self.store.upsert(&records)
    }

    // == Add Many ==
    /// [`Cache::add`] for every pair. Pairs whose key is still live are
    /// skipped without failing the rest; returns how many were stored.
    pub fn add_many<T: Serialize>(
        &self,
        items: &[(&str, T)],
        timeout: Option<i64>,
    ) -> Result<usize> {
        let now = expiry::now();
        let records = self.encode_records(items, self.expires_at(timeout, now))?;
        self.store.conditional_insert(&records, now)
    }

    // == Update Many ==
    /// [`Cache::update`] for every pair; returns how many records
    /// changed. Absent and expired keys are skipped, never an error.
    pub fn update_many<T: Serialize>(&self, items: &[(&str, T)]) -> Result<usize> {
        let now = expiry::now();
        let updates = items
            .iter()
            .map(|(key, value)| Ok(((*key).to_string(), self.codec.encode(value)?)))
            .collect::<Result<Vec<_>>>()?;
        self.store.conditional_update(&updates, now)
    }

    // == Touch Many ==
    /// [`Cache::touch`] for every key; returns how many records changed.
    pub fn touch_many(&self, keys: &[&str], timeout: Option<i64>) -> Result<usize> {
        let now = expiry::now();
        self.store
            .conditional_touch(keys, self.expires_at(timeout, now), now)
    }

    // == Delete Many ==
    /// Removes every key; returns how many records existed.
    pub fn delete_many(&self, keys: &[&str]) -> Result<usize> {
        self.store.delete_many(keys)
    }

    // == TTL Many ==
    /// [`Cache::ttl`] for every key. The result always contains every
    /// requested key; expired rows observed are removed in one sweep.
    pub fn ttl_many(&self, keys: &[&str]) -> Result<HashMap<String, i64>> {
        let now = expiry::now();
        let expiries: HashMap<String, i64> = self
            .store
            .select_many(keys)?
            .into_iter()
            .map(|record| (record.key, record.expires_at))
            .collect();

        let mut results = HashMap::with_capacity(keys.len());
        let mut stale: Vec<&str> = Vec::new();
        for &key in keys {
            let ttl = match expiries.get(key) {
                Some(&expires_at) => {
                    let remaining = expiry::remaining(expires_at, now);
                    if remaining == TTL_MISSING {
                        stale.push(key);
                    }
                    remaining
                }
                None => TTL_MISSING,
            };
            results.insert(key.to_string(), ttl);
        }

        if !stale.is_empty() {
            self.evict_stale_many(&stale);
        }
        Ok(results)
    }

    // == Memoize ==
    /// Returns the cached result of `compute` for the given callable name
    /// and arguments, invoking `compute` only on a miss and storing its
    /// result with [`Cache::set`] semantics.
    ///
    /// The cache key derives from `name` plus the canonical JSON encoding
    /// of `args` (object keys sort), so identical argument sets hit the
    /// same entry no matter how they were built, and distinct argument
    /// sets never collide. Arguments that cannot be encoded are an
    /// error, not a silent cache bypass.
    pub fn memoize<A, T, F>(
        &self,
        name: &str,
        args: &A,
        timeout: Option<i64>,
        compute: F,
    ) -> Result<T>
    where
        A: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let key = memo_key(name, args)?;
        if let Some(value) = self.get(&key)? {
            return Ok(value);
        }
        let value = compute();
        self.set(&key, &value, timeout)?;
        Ok(value)
    }

    // == Keys ==
    /// All keys with a live record, in sort order. Expired rows observed
    /// by the scan are removed.
    pub fn keys(&self) -> Result<Vec<String>> {
        let scanned = self.store.select_keys()?;
        Ok(self.filter_live_keys(scanned))
    }

    /// Keys with a live record matching a SQL `LIKE` pattern, in sort
    /// order.
    pub fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let scanned = self.store.select_keys_like(pattern)?;
        Ok(self.filter_live_keys(scanned))
    }

    /// Keys with a live record starting with `prefix`.
    pub fn keys_starting_with(&self, prefix: &str) -> Result<Vec<String>> {
        self.keys_matching(&format!("{prefix}%"))
    }

    /// Keys with a live record ending with `suffix`.
    pub fn keys_ending_with(&self, suffix: &str) -> Result<Vec<String>> {
        self.keys_matching(&format!("%{suffix}"))
    }

    /// Keys with a live record containing `needle`.
    pub fn keys_containing(&self, needle: &str) -> Result<Vec<String>> {
        self.keys_matching(&format!("%{needle}%"))
    }

    // == Clear Matching ==
    /// Removes every key matching a SQL `LIKE` pattern; returns how many
    /// records existed.
    pub fn clear_matching(&self, pattern: &str) -> Result<usize> {
        self.store.delete_like(pattern)
    }

    /// Removes every key starting with `prefix`.
    pub fn clear_starting_with(&self, prefix: &str) -> Result<usize> {
        self.clear_matching(&format!("{prefix}%"))
    }

    /// Removes every key ending with `suffix`.
    pub fn clear_ending_with(&self, suffix: &str) -> Result<usize> {
        self.clear_matching(&format!("%{suffix}"))
    }

    /// Removes every key containing `needle`.
    pub fn clear_containing(&self, needle: &str) -> Result<usize> {
        self.clear_matching(&format!("%{needle}%"))
    }

    // == Len ==
    /// Number of stored rows. Stale rows count until a read path
    /// reclaims them.
    pub fn len(&self) -> Result<u64> {
        self.store.count()
    }

    /// Whether no rows are stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // == Stats ==
    /// Snapshot of this engine's performance counters.
    pub fn stats(&self) -> Result<CacheStats> {
        Ok(self.stats.snapshot(self.store.count()?))
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    // == Close ==
    /// Releases this engine's hold on the shared session. The session
    /// itself closes once the last engine for the identity is gone;
    /// dropping the engine has the same effect.
    pub fn close(self) {}

    /// Encodes a batch up front so no write happens after a failure.
    fn encode_records<T: Serialize>(
        &self,
        items: &[(&str, T)],
        expires_at: i64,
    ) -> Result<Vec<Record>> {
        items
            .iter()
            .map(|(key, value)| Ok(Record::new(*key, self.codec.encode(value)?, expires_at)))
            .collect()
    }

    /// Splits a key scan into live keys and a purge of the stale ones.
    fn filter_live_keys(&self, scanned: Vec<(String, i64)>) -> Vec<String> {
        let now = expiry::now();
        let mut live = Vec::with_capacity(scanned.len());
        let mut stale = Vec::new();
        for (key, expires_at) in scanned {
            if expiry::is_live(expires_at, now) {
                live.push(key);
            } else {
                stale.push(key);
            }
        }
        if !stale.is_empty() {
            let refs: Vec<&str> = stale.iter().map(String::as_str).collect();
            self.evict_stale_many(&refs);
        }
        live
    }
}

// == Memo Key Derivation ==
/// Derived key for a memoized call: callable name plus canonical
/// (sorted-key) JSON arguments.
fn memo_key<A: Serialize>(name: &str, args: &A) -> Result<String> {
    let args = serde_json::to_value(args).map_err(|e| CacheError::Encoding(e.to_string()))?;
    Ok(format!("memo:{name}:{args}"))
}
