//! Lookup cache fronting the storage substrate.
//!
//! Maps a lookup value (the encoded equality tuple, index prefix
//! stripped) to its serialized postings list. Entries are sharded
//! across independently locked hash maps; a reader that cannot acquire
//! its shard within the configured timeout treats the lookup as a miss
//! and falls through to the substrate, never as an error.
//!
//! Payloads above the compression threshold are stored LZ4-compressed
//! behind a one-byte marker when that saves at least a quarter of the
//! original size:
//!
//! ```text
//! [0xFF][4-byte BE original length][lz4 block]
//! ```
//!
//! Raw payloads start with a postings count and can never begin with
//! the marker byte.

use crate::error::EngineResult;
use bytes::Bytes;
use docdex_codec::{compress_lookup, encode_lookup, CodecError, Value, PREFIX_MARKER};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Marker byte that opens a compressed cache payload.
const COMPRESSED_MARKER: u8 = 0xFF;

/// Configuration for a [`LookupCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of independently locked shards.
    pub shard_count: usize,

    /// Payload size in bytes above which compression is attempted.
    pub compression_threshold: usize,

    /// How long a lookup waits for a shard lock before it is treated
    /// as a miss.
    pub lock_timeout: Duration,

    /// Whether every invalidation re-primes the entry from the
    /// substrate, regardless of the per-operation flag.
    pub always_refill: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            compression_threshold: 4 * 1024,
            lock_timeout: Duration::from_millis(10),
            always_refill: false,
        }
    }
}

impl CacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of shards.
    #[must_use]
    pub const fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = count;
        self
    }

    /// Sets the compression threshold in bytes.
    #[must_use]
    pub const fn compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Sets the shard-lock timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether invalidation always re-primes the entry.
    #[must_use]
    pub const fn always_refill(mut self, value: bool) -> Self {
        self.always_refill = value;
        self
    }
}

type Shard = RwLock<HashMap<Vec<u8>, Bytes>>;

/// Sharded in-memory cache of resolved lookups.
///
/// Shared read/write across all transactions; see the module docs for
/// the locking and wire-format rules.
pub struct LookupCache {
    config: CacheConfig,
    shards: Vec<Shard>,
}

impl LookupCache {
    /// Creates a cache with the given configuration.
    ///
    /// A zero shard count is clamped to one.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let count = config.shard_count.max(1);
        let shards = (0..count).map(|_| Shard::default()).collect();
        Self { config, shards }
    }

    /// The configuration this cache was built with.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        let hash = xxh3_64(key) as usize;
        &self.shards[hash % self.shards.len()]
    }

    /// Looks up the wire-format payload cached for `key`.
    ///
    /// Returns `None` on a true miss and on a shard-lock timeout. An
    /// empty-postings payload is a hit: "found, zero results".
    #[must_use]
    pub fn find(&self, key: &[u8]) -> Option<Bytes> {
        let Some(shard) = self.shard(key).try_read_for(self.config.lock_timeout) else {
            debug!("cache shard lock timed out, treating lookup as a miss");
            return None;
        };
        shard.get(key).cloned()
    }

    /// Inserts the serialized postings for `key`, compressing when the
    /// size gate allows.
    ///
    /// A shard-lock timeout drops the insertion; the cache is an
    /// accelerator, losing a fill is never an error.
    pub fn insert(&self, key: &[u8], serialized: &[u8]) {
        let payload = self.seal(serialized);
        let Some(mut shard) = self.shard(key).try_write_for(self.config.lock_timeout) else {
            debug!("cache shard lock timed out, dropping fill");
            return;
        };
        shard.insert(key.to_vec(), payload);
    }

    /// Removes the entry cached for `key`.
    ///
    /// Invalidation is required for correctness and always waits for
    /// the shard lock.
    pub fn invalidate(&self, key: &[u8]) {
        self.shard(key).write().remove(key);
    }

    /// Number of entries across all shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Returns true if no entry is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Applies the compression gate to a serialized payload.
    fn seal(&self, serialized: &[u8]) -> Bytes {
        if serialized.len() > self.config.compression_threshold {
            if let Ok(original_len) = u32::try_from(serialized.len()) {
                let block = lz4_flex::compress(serialized);
                // Store compressed only when it saves at least 25%.
                if (block.len() + 5) * 4 <= serialized.len() * 3 {
                    debug!(
                        original = serialized.len(),
                        compressed = block.len(),
                        "compressing cache payload"
                    );
                    let mut payload = Vec::with_capacity(block.len() + 5);
                    payload.push(COMPRESSED_MARKER);
                    payload.extend_from_slice(&original_len.to_be_bytes());
                    payload.extend_from_slice(&block);
                    return Bytes::from(payload);
                }
            }
        }
        Bytes::copy_from_slice(serialized)
    }
}

/// Derives the cache key for one equality tuple.
///
/// Edge-style lookups, a single string field whose collection segment is
/// registered in the process-wide name table, use the compressed form so
/// the repeated collection name is not stored per entry. Every other
/// tuple keys by its order-preserving encoding. Compressed keys open
/// with a marker byte no tuple encoding can produce, so the two forms
/// never collide.
///
/// # Errors
///
/// Returns an error if the tuple cannot be encoded.
pub(crate) fn lookup_cache_key(tuple: &[Value]) -> EngineResult<Vec<u8>> {
    if let [Value::String(value)] = tuple {
        let compressed = compress_lookup(value);
        if compressed.first() == Some(&PREFIX_MARKER) {
            return Ok(compressed);
        }
    }
    Ok(encode_lookup(tuple)?)
}

/// Unwraps a cache payload back to the serialized postings bytes.
///
/// # Errors
///
/// Returns an error if a compressed payload is truncated or does not
/// decompress to its recorded length.
pub fn open_payload(payload: &Bytes) -> EngineResult<Bytes> {
    if payload.first() != Some(&COMPRESSED_MARKER) {
        return Ok(payload.clone());
    }
    let header = payload.get(1..5).ok_or_else(|| CodecError::Truncated {
        offset: payload.len(),
        expected: 5 - payload.len(),
    })?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(header);
    let original_len = u32::from_be_bytes(buf) as usize;

    let raw = lz4_flex::decompress(&payload[5..], original_len)
        .map_err(|err| CodecError::encoding_failure(format!("cache payload: {err}")))?;
    Ok(Bytes::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postings::{decode_postings, encode_postings};

    fn cache(threshold: usize) -> LookupCache {
        LookupCache::new(CacheConfig::new().compression_threshold(threshold))
    }

    #[test]
    fn empty_marker_is_a_hit() {
        let cache = cache(4096);
        let empty = encode_postings(&[]).unwrap();
        cache.insert(b"v", &empty);

        let payload = cache.find(b"v").expect("negative entry should be found");
        let raw = open_payload(&payload).unwrap();
        assert!(decode_postings(&raw).unwrap().is_empty());
    }

    #[test]
    fn miss_is_none() {
        let cache = cache(4096);
        assert!(cache.find(b"absent").is_none());
    }

    #[test]
    fn large_compressible_payload_is_stored_compressed() {
        let cache = cache(64);
        let serialized = vec![7u8; 10_000];
        cache.insert(b"k", &serialized);

        let payload = cache.find(b"k").unwrap();
        assert_eq!(payload[0], COMPRESSED_MARKER);
        assert!(payload.len() < serialized.len());
        assert_eq!(open_payload(&payload).unwrap().as_ref(), &serialized[..]);
    }

    #[test]
    fn small_payload_stays_raw() {
        let cache = cache(4096);
        let serialized = vec![7u8; 100];
        cache.insert(b"k", &serialized);

        let payload = cache.find(b"k").unwrap();
        assert_eq!(payload.as_ref(), &serialized[..]);
    }

    #[test]
    fn incompressible_payload_stays_raw() {
        let cache = cache(64);
        // A pseudo-random sequence LZ4 cannot shrink by 25%.
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        let serialized: Vec<u8> = (0..512)
            .map(|_| {
                state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                (state >> 56) as u8
            })
            .collect();
        cache.insert(b"k", &serialized);

        let payload = cache.find(b"k").unwrap();
        assert_eq!(payload.as_ref(), &serialized[..]);
    }

    #[test]
    fn edge_lookup_key_is_compressed() {
        docdex_codec::register_collections(["vertices", "edges"]);
        let key = lookup_cache_key(&[Value::from("vertices/123")]).unwrap();
        assert_eq!(key[0], PREFIX_MARKER);

        // Unregistered collections and non-string tuples key by encoding.
        let raw = lookup_cache_key(&[Value::from("elsewhere/123")]).unwrap();
        assert_eq!(raw, encode_lookup(&[Value::from("elsewhere/123")]).unwrap());
        let number = lookup_cache_key(&[Value::from(5i64)]).unwrap();
        assert_eq!(number, encode_lookup(&[Value::from(5i64)]).unwrap());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = cache(4096);
        cache.insert(b"k", &[0, 0, 0, 0]);
        assert_eq!(cache.len(), 1);
        cache.invalidate(b"k");
        assert!(cache.find(b"k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_empties_all_shards() {
        let cache = cache(4096);
        for i in 0..64u8 {
            cache.insert(&[i], &[0, 0, 0, 0]);
        }
        assert_eq!(cache.len(), 64);
        cache.clear();
        assert!(cache.is_empty());
    }
}
