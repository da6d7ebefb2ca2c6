//! litecache - A persistent SQLite-backed key-value cache
//!
//! Provides Django-style cache operations (get/set/add/update/touch,
//! batch variants, counters, memoization, TTL introspection) on top of
//! an embedded SQLite database. Caches built with the same filename and
//! path share one database session and observe the same data; dropping
//! the last one closes the session.

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{
    BincodeCodec, Cache, CacheStats, Codec, JsonCodec, Record, Registry, SqliteStore, NEVER,
    TTL_MISSING, TTL_NEVER,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
