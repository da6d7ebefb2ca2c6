//! Cache Module
//!
//! Persistent SQLite-backed key-value caching with TTL expiration and
//! lazy eviction.

mod codec;
mod expiry;
mod registry;
mod sqlite;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use expiry::{Record, NEVER, TTL_MISSING, TTL_NEVER};
pub use registry::Registry;
pub use sqlite::SqliteStore;
pub use stats::CacheStats;
pub use store::Cache;
