//! Property-Based Tests for the Cache Module
//!
//! Uses proptest to verify expiry-policy invariants, codec round-trips,
//! and statistics accuracy over operation sequences.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::codec::{BincodeCodec, Codec, JsonCodec};
use crate::cache::expiry::{self, NEVER, TTL_MISSING, TTL_NEVER};
use crate::cache::registry::Registry;
use crate::cache::store::Cache;
use crate::config::CacheConfig;

// == Strategies ==
/// Generates valid cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,16}"
}

/// Generates valid cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,64}"
}

/// Epoch timestamps well inside the representable range
fn now_strategy() -> impl Strategy<Value = i64> {
    1_000_000_000i64..4_000_000_000i64
}

/// A sequence of cache operations for the statistics property
#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

/// Each case gets its own identity so the shared in-memory databases
/// never bleed between cases.
fn fresh_cache() -> Cache {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let config = CacheConfig::new()
        .filename(format!("litecache-prop-{}-{id}.cache", std::process::id()))
        .path(std::env::temp_dir());
    Cache::open_in(&Registry::new(), config).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A negative timeout always produces the never-expires sentinel, and
    // the sentinel is live at any time.
    #[test]
    fn prop_negative_timeout_is_never(timeout in i64::MIN..0i64, now in now_strategy()) {
        let expires_at = expiry::to_absolute(timeout, now);
        prop_assert_eq!(expires_at, NEVER);
        prop_assert!(expiry::is_live(expires_at, now));
        prop_assert_eq!(expiry::remaining(expires_at, now), TTL_NEVER);
    }

    // A non-negative timeout is live exactly until it has fully elapsed.
    #[test]
    fn prop_liveness_matches_elapsed_time(timeout in 0i64..100_000, now in now_strategy()) {
        let expires_at = expiry::to_absolute(timeout, now);
        prop_assert_eq!(expiry::is_live(expires_at, now), timeout > 0);
        prop_assert!(!expiry::is_live(expires_at, now + timeout));
        if timeout > 1 {
            prop_assert!(expiry::is_live(expires_at, now + timeout - 1));
        }
    }

    // For a live record, `remaining` reports the exact whole seconds
    // left; otherwise it reports the missing sentinel. The two views
    // never disagree.
    #[test]
    fn prop_remaining_agrees_with_liveness(timeout in 0i64..100_000, now in now_strategy(), elapsed in 0i64..200_000) {
        let expires_at = expiry::to_absolute(timeout, now);
        let later = now + elapsed;
        let remaining = expiry::remaining(expires_at, later);
        if expiry::is_live(expires_at, later) {
            prop_assert_eq!(remaining, timeout - elapsed);
        } else {
            prop_assert_eq!(remaining, TTL_MISSING);
        }
    }

    // Any serde-encodable value survives the trip through both codecs.
    #[test]
    fn prop_codec_roundtrip(text in valid_value_strategy(), number in any::<i64>(), list in prop::collection::vec(any::<u32>(), 0..8)) {
        let value = (text, number, list);

        let encoded = JsonCodec.encode(&value).unwrap();
        let decoded: (String, i64, Vec<u32>) = JsonCodec.decode(&encoded).unwrap();
        prop_assert_eq!(&decoded, &value);

        let encoded = BincodeCodec.encode(&value).unwrap();
        let decoded: (String, i64, Vec<u32>) = BincodeCodec.decode(&encoded).unwrap();
        prop_assert_eq!(&decoded, &value);
    }

    // For any sequence of operations, the statistics reflect exactly the
    // hits and misses that occurred.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..30)) {
        let cache = fresh_cache();
        let mut shadow: HashMap<String, String> = HashMap::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, value } => {
                    cache.set(&key, &value, Some(-1)).unwrap();
                    shadow.insert(key, value);
                }
                CacheOp::Get { key } => {
                    let got = cache.get::<String>(&key).unwrap();
                    match shadow.get(&key) {
                        Some(expected) => {
                            prop_assert_eq!(got.as_ref(), Some(expected));
                            expected_hits += 1;
                        }
                        None => {
                            prop_assert!(got.is_none());
                            expected_misses += 1;
                        }
                    }
                }
                CacheOp::Delete { key } => {
                    cache.delete(&key).unwrap();
                    shadow.remove(&key);
                }
            }
        }

        let stats = cache.stats().unwrap();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries as usize, shadow.len(), "Total entries mismatch");
    }
}
