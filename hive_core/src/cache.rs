//! The "CACHE" Engine - content-addressed, TTL-bounded response cache.
//!
//! Sits in front of the reasoning service so that identical prompts are
//! answered once per TTL window:
//! - Keys are SHA-256 over the ordered input list, so the same strings in a
//!   different order are a different key
//! - Two tiers: an in-process map, then an optional persistent store; a
//!   persistent hit is promoted into memory
//! - Expired entries read as misses in either tier and are left in place
//! - Persistent-tier failures are logged and treated as misses, never raised

use hive_env::SwarmError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Background flush cadence of the persistent tier.
const SLED_FLUSH_EVERY_MS: u64 = 500;

/// Default entry lifetime (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A cached response and the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,

    /// Stored response text
    pub response: String,
}

impl CacheEntry {
    /// Returns true if the entry is older than `ttl` at `now_ms`.
    ///
    /// A `None` TTL never expires.
    pub fn is_expired(&self, ttl: Option<Duration>, now_ms: u64) -> bool {
        match ttl {
            Some(ttl) => now_ms.saturating_sub(self.timestamp_ms) > ttl.as_millis() as u64,
            None => false,
        }
    }
}

// ============================================================================
// PERSISTENT TIER
// ============================================================================

/// Trait for the persistent cache tier.
pub trait CacheStore: Send + Sync {
    /// Loads the entry stored under `key`
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, SwarmError>;

    /// Stores `entry` under `key`, overwriting any previous entry
    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), SwarmError>;

    /// Removes every entry
    fn clear(&self) -> Result<(), SwarmError>;
}

/// Sled-based persistent cache tier.
///
/// Records are JSON-encoded `CacheEntry` values keyed by content hash.
/// Writes reach disk through sled's background flush and a final flush on
/// drop, so no insert waits on disk.
pub struct SledCacheStore {
    db: sled::Db,
}

impl SledCacheStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SwarmError> {
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(SLED_FLUSH_EVERY_MS))
            .open()
            .map_err(|e| SwarmError::cache(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store that is removed on drop
    pub fn temporary() -> Result<Self, SwarmError> {
        let config = sled::Config::new().temporary(true);
        let db = config
            .open()
            .map_err(|e| SwarmError::cache(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl CacheStore for SledCacheStore {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, SwarmError> {
        let Some(bytes) = self
            .db
            .get(key.as_bytes())
            .map_err(|e| SwarmError::cache(format!("Read failed: {}", e)))?
        else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(&bytes)
            .map_err(|e| SwarmError::cache(format!("Corrupt record: {}", e)))?;
        Ok(Some(entry))
    }

    fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), SwarmError> {
        let bytes = serde_json::to_vec(entry)
            .map_err(|e| SwarmError::cache(format!("Encode failed: {}", e)))?;
        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| SwarmError::cache(format!("Insert failed: {}", e)))?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SwarmError> {
        self.db
            .clear()
            .map_err(|e| SwarmError::cache(format!("Clear failed: {}", e)))?;
        Ok(())
    }
}

impl Drop for SledCacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "Final cache flush failed");
        }
    }
}

// ============================================================================
// RESPONSE CACHE
// ============================================================================

/// Configuration for a response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory of the persistent tier (`None` = memory only)
    pub directory: Option<PathBuf>,

    /// Entry lifetime (`None` = never expires)
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            ttl: Some(DEFAULT_TTL),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
}

type MillisClock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Two-tier, content-addressed cache of reasoning responses.
pub struct ResponseCache {
    ttl: Option<Duration>,
    memory: Mutex<HashMap<String, CacheEntry>>,
    store: Option<Box<dyn CacheStore>>,
    clock: MillisClock,
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Creates a memory-only cache.
    pub fn in_memory(ttl: Option<Duration>) -> Self {
        Self::build(ttl, None)
    }

    /// Creates a cache backed by the given persistent store.
    pub fn with_store(ttl: Option<Duration>, store: Box<dyn CacheStore>) -> Self {
        Self::build(ttl, Some(store))
    }

    /// Creates a cache from configuration, opening a sled tier if a
    /// directory is configured.
    pub fn from_config(config: &CacheConfig) -> Result<Self, SwarmError> {
        match &config.directory {
            Some(dir) => {
                let store = SledCacheStore::open(dir)?;
                Ok(Self::with_store(config.ttl, Box::new(store)))
            }
            None => Ok(Self::in_memory(config.ttl)),
        }
    }

    fn build(ttl: Option<Duration>, store: Option<Box<dyn CacheStore>>) -> Self {
        Self {
            ttl,
            memory: Mutex::new(HashMap::new()),
            store,
            clock: Arc::new(system_millis),
            memory_hits: AtomicU64::new(0),
            persistent_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Replaces the time source (milliseconds since the epoch).
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Returns the configured TTL.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Computes the content key of an ordered input list.
    ///
    /// The inputs are serialized as a JSON array and hashed with SHA-256.
    pub fn key<S: AsRef<str>>(inputs: &[S]) -> String {
        let ordered: Vec<&str> = inputs.iter().map(AsRef::as_ref).collect();
        // Serializing a slice of &str cannot fail.
        let canonical = serde_json::to_string(&ordered).unwrap_or_default();
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a response, memory tier first.
    pub fn get<S: AsRef<str>>(&self, inputs: &[S]) -> Option<String> {
        let key = Self::key(inputs);
        let now = (self.clock)();

        if let Some(entry) = self.memory().get(&key) {
            if !entry.is_expired(self.ttl, now) {
                self.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
        }

        if let Some(store) = &self.store {
            match store.load(&key) {
                Ok(Some(entry)) if !entry.is_expired(self.ttl, now) => {
                    debug!(key = %&key[..12], "Promoting persistent cache hit");
                    let response = entry.response.clone();
                    self.memory().insert(key, entry);
                    self.persistent_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(response);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Persistent cache lookup failed, treating as miss"),
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores a response in both tiers, overwriting any previous entry.
    pub fn set<S: AsRef<str>>(&self, inputs: &[S], response: impl Into<String>) {
        let key = Self::key(inputs);
        let entry = CacheEntry {
            timestamp_ms: (self.clock)(),
            response: response.into(),
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.store(&key, &entry) {
                warn!(error = %e, "Persistent cache write failed");
            }
        }
        self.memory().insert(key, entry);
    }

    /// Empties both tiers.
    pub fn clear(&self) {
        self.memory().clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "Persistent cache clear failed");
            }
        }
    }

    /// Returns the number of entries held in memory.
    pub fn memory_len(&self) -> usize {
        self.memory().len()
    }

    /// Returns hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, impl Fn() -> u64 + Send + Sync + 'static) {
        let now = Arc::new(AtomicU64::new(start));
        let reader = Arc::clone(&now);
        (now, move || reader.load(Ordering::SeqCst))
    }

    #[test]
    fn test_key_is_order_sensitive() {
        let ab = ResponseCache::key(&["a", "b"]);
        let ba = ResponseCache::key(&["b", "a"]);
        assert_ne!(ab, ba);
        assert_eq!(ab, ResponseCache::key(&["a".to_string(), "b".to_string()]));
        assert_eq!(ab.len(), 64);
    }

    #[test]
    fn test_key_does_not_confuse_boundaries() {
        assert_ne!(ResponseCache::key(&["ab", "c"]), ResponseCache::key(&["a", "bc"]));
    }

    #[test]
    fn test_get_after_set_hits() {
        let cache = ResponseCache::in_memory(Some(DEFAULT_TTL));
        assert_eq!(cache.get(&["sys", "hello"]), None);

        cache.set(&["sys", "hello"], "world");

        assert_eq!(cache.get(&["sys", "hello"]).as_deref(), Some("world"));
        assert_eq!(cache.get(&["sys", "hello"]).as_deref(), Some("world"));
        assert_eq!(cache.stats().memory_hits, 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_entries_expire_on_read() {
        let (now, clock) = manual_clock(1_000);
        let cache = ResponseCache::in_memory(Some(Duration::from_secs(10))).with_clock(clock);
        cache.set(&["p"], "r");

        now.store(1_000 + 10_000, Ordering::SeqCst);
        assert_eq!(cache.get(&["p"]).as_deref(), Some("r"));

        now.store(1_000 + 10_001, Ordering::SeqCst);
        assert_eq!(cache.get(&["p"]), None);
        // Expired entries are not proactively deleted
        assert_eq!(cache.memory_len(), 1);
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let (now, clock) = manual_clock(0);
        let cache = ResponseCache::in_memory(None).with_clock(clock);
        cache.set(&["p"], "r");
        now.store(u64::MAX / 2, Ordering::SeqCst);

        assert_eq!(cache.get(&["p"]).as_deref(), Some("r"));
    }

    #[test]
    fn test_set_overwrites_and_refreshes_timestamp() {
        let (now, clock) = manual_clock(0);
        let cache = ResponseCache::in_memory(Some(Duration::from_secs(5))).with_clock(clock);
        cache.set(&["p"], "first");
        now.store(4_000, Ordering::SeqCst);
        cache.set(&["p"], "second");
        now.store(8_000, Ordering::SeqCst);

        assert_eq!(cache.get(&["p"]).as_deref(), Some("second"));
    }

    #[test]
    fn test_persistent_hit_is_promoted() {
        let store = SledCacheStore::temporary().unwrap();
        let key = ResponseCache::key(&["sys", "q"]);
        store
            .store(&key, &CacheEntry { timestamp_ms: system_millis(), response: "stored".into() })
            .unwrap();

        let cache = ResponseCache::with_store(Some(DEFAULT_TTL), Box::new(store));
        assert_eq!(cache.memory_len(), 0);

        assert_eq!(cache.get(&["sys", "q"]).as_deref(), Some("stored"));
        assert_eq!(cache.memory_len(), 1);
        assert_eq!(cache.stats().persistent_hits, 1);

        assert_eq!(cache.get(&["sys", "q"]).as_deref(), Some("stored"));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = std::env::temp_dir().join(format!("hive-cache-{}", uuid::Uuid::new_v4()));
        {
            let cache = ResponseCache::with_store(
                Some(DEFAULT_TTL),
                Box::new(SledCacheStore::open(&dir).unwrap()),
            );
            cache.set(&["sys", "q"], "kept");
        }

        let reopened = ResponseCache::with_store(
            Some(DEFAULT_TTL),
            Box::new(SledCacheStore::open(&dir).unwrap()),
        );
        let hit = reopened.get(&["sys", "q"]);
        drop(reopened);
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(hit.as_deref(), Some("kept"));
    }

    #[test]
    fn test_expired_persistent_entry_is_a_miss() {
        let store = SledCacheStore::temporary().unwrap();
        let key = ResponseCache::key(&["q"]);
        store
            .store(&key, &CacheEntry { timestamp_ms: 0, response: "ancient".into() })
            .unwrap();

        let cache = ResponseCache::with_store(Some(Duration::from_secs(60)), Box::new(store));
        assert_eq!(cache.get(&["q"]), None);
        assert_eq!(cache.memory_len(), 0);
    }

    #[test]
    fn test_clear_empties_both_tiers() {
        let store = SledCacheStore::temporary().unwrap();
        let cache = ResponseCache::with_store(Some(DEFAULT_TTL), Box::new(store));
        cache.set(&["q"], "r");
        cache.clear();

        assert_eq!(cache.memory_len(), 0);
        assert_eq!(cache.get(&["q"]), None);
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn load(&self, _key: &str) -> Result<Option<CacheEntry>, SwarmError> {
            Err(SwarmError::cache("disk on fire"))
        }
        fn store(&self, _key: &str, _entry: &CacheEntry) -> Result<(), SwarmError> {
            Err(SwarmError::cache("disk on fire"))
        }
        fn clear(&self) -> Result<(), SwarmError> {
            Err(SwarmError::cache("disk on fire"))
        }
    }

    #[test]
    fn test_store_failures_are_recovered_locally() {
        let cache = ResponseCache::with_store(Some(DEFAULT_TTL), Box::new(BrokenStore));
        assert_eq!(cache.get(&["q"]), None);

        cache.set(&["q"], "r");
        assert_eq!(cache.get(&["q"]).as_deref(), Some("r"));

        cache.clear();
        assert_eq!(cache.memory_len(), 0);
    }
}
