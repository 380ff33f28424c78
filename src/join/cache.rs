//! Process-wide join-result cache.
//!
//! Results are keyed by a blake3 content hash of the join operands: each
//! side's schema, row count and every column's buffers, plus the key pairs
//! and join kind. Hashing the full column content (not just the schema and
//! keys) keeps two same-shaped batches with different rows from aliasing;
//! operands that agree on the join keys can still differ in the payload
//! columns the joined rows carry.
//!
//! The cache is an explicitly injected service, never a hidden singleton:
//! concurrent requests share or isolate caches by configuration. Lookups are
//! safe under a mutex; entries are only ever inserted under fresh keys, so
//! an abandoned request cannot corrupt another request's results.

use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::join::JoinKind;
use crate::plan::JoinStrategy;

/// Content-hash key for one join result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyParts<'a> {
    left: BatchFingerprint,
    right: BatchFingerprint,
    keys: &'a [(String, String)],
    kind: JoinKind,
    strategy: JoinStrategy,
}

#[derive(Serialize)]
struct BatchFingerprint {
    fields: Vec<(String, String)>,
    rows: usize,
    column_digests: Vec<String>,
}

fn fingerprint(batch: &RecordBatch) -> BatchFingerprint {
    let fields = batch
        .schema()
        .fields()
        .iter()
        .map(|f| (f.name().clone(), format!("{:?}", f.data_type())))
        .collect();
    let column_digests = batch
        .columns()
        .iter()
        .map(|array| {
            let mut hasher = blake3::Hasher::new();
            let data = array.to_data();
            for buffer in data.buffers() {
                hasher.update(buffer.as_slice());
            }
            if let Some(nulls) = data.nulls() {
                hasher.update(nulls.buffer().as_slice());
            }
            hasher.finalize().to_hex().to_string()
        })
        .collect();
    BatchFingerprint {
        fields,
        rows: batch.num_rows(),
        column_digests,
    }
}

/// Compute the content-hash cache key for a join.
pub fn cache_key(
    left: &RecordBatch,
    right: &RecordBatch,
    keys: &[(String, String)],
    kind: JoinKind,
    strategy: JoinStrategy,
) -> Result<CacheKey> {
    let parts = KeyParts {
        left: fingerprint(left),
        right: fingerprint(right),
        keys,
        kind,
        strategy,
    };
    let bytes = serde_json::to_vec(&parts)
        .map_err(|e| crate::error::EstimatorError::computation(e.to_string()))?;
    Ok(CacheKey(blake3::hash(&bytes).to_hex().to_string()))
}

struct Entry {
    batch: RecordBatch,
    bytes: usize,
    inserted: Instant,
    last_used: Instant,
}

struct Inner {
    map: FxHashMap<CacheKey, Entry>,
    total_bytes: usize,
}

/// LRU + TTL cache for join results.
pub struct JoinCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
    ttl: Duration,
}

impl JoinCache {
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: FxHashMap::default(),
                total_bytes: 0,
            }),
            max_entries,
            max_bytes,
            ttl,
        }
    }

    /// Look up a cached join result. Expired entries count as misses and are
    /// dropped on the way out.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<RecordBatch> {
        let mut inner = self.inner.lock().expect("join cache poisoned");
        let expired = inner
            .map
            .get(key)
            .is_some_and(|e| e.inserted.elapsed() > self.ttl);
        if expired {
            if let Some(e) = inner.map.remove(key) {
                inner.total_bytes -= e.bytes;
            }
            return None;
        }
        let entry = inner.map.get_mut(key)?;
        entry.last_used = Instant::now();
        Some(entry.batch.clone())
    }

    /// Insert a join result under a fresh key. Existing keys are left
    /// untouched (the content hash makes them interchangeable anyway).
    pub fn insert(&self, key: CacheKey, batch: RecordBatch) {
        let bytes = batch.get_array_memory_size();
        let mut inner = self.inner.lock().expect("join cache poisoned");
        if inner.map.contains_key(&key) {
            return;
        }
        let now = Instant::now();
        inner.total_bytes += bytes;
        inner.map.insert(
            key,
            Entry {
                batch,
                bytes,
                inserted: now,
                last_used: now,
            },
        );
        self.evict(&mut inner);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("join cache poisoned").map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, inner: &mut Inner) {
        while inner.map.len() > self.max_entries || inner.total_bytes > self.max_bytes {
            // Entry counts stay small (tens), so a scan for the LRU victim
            // is cheaper than maintaining an ordered structure.
            let victim = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    if let Some(e) = inner.map.remove(&key) {
                        inner.total_bytes -= e.bytes;
                    }
                }
                None => break,
            }
        }
    }
}
