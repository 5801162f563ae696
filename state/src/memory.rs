//! In-process ephemeral store
//!
//! A fixed byte budget is split across independently locked segments. Keys
//! hash to a segment; when a segment runs out of room it drops expired
//! entries first and then its least recently used entry, so eviction is
//! LRU per segment and only approximately LRU overall.

use async_trait::async_trait;
use parking_lot::Mutex;
use ras_core::{EphemeralStore, RasError, RasResult, StoreConfig};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bookkeeping bytes charged per entry on top of key and value
pub const ENTRY_OVERHEAD: usize = 24;

struct Entry {
    value: Vec<u8>,
    /// `None` never expires
    expires_at: Option<Instant>,
    last_access: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn entry_cost(key: &[u8], value: &[u8]) -> usize {
    key.len() + value.len() + ENTRY_OVERHEAD
}

#[derive(Default)]
struct Segment {
    entries: HashMap<Vec<u8>, Entry>,
    used: usize,
}

impl Segment {
    fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.used -= entry_cost(key, &entry.value);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn least_recently_used(&self) -> Option<Vec<u8>> {
        self.entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone())
    }
}

/// Snapshot of store counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub bytes_used: usize,
    pub capacity_bytes: usize,
    /// Largest entry (key + value + overhead) a segment accepts
    pub max_entry_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
}

/// Segmented TTL store
pub struct MemoryBox {
    segments: Vec<Mutex<Segment>>,
    segment_capacity: usize,
    default_ttl: Duration,
    tick: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryBox {
    /// Create a store of `capacity_bytes` split over `segments`.
    /// A zero TTL means entries never expire on their own.
    pub fn new(capacity_bytes: usize, segments: usize, default_ttl: Duration) -> Self {
        let segments = segments.max(1);
        Self {
            segments: (0..segments).map(|_| Mutex::new(Segment::default())).collect(),
            segment_capacity: (capacity_bytes / segments).max(1),
            default_ttl,
            tick: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.capacity_bytes, config.segments, config.default_ttl())
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn segment(&self, key: &[u8]) -> &Mutex<Segment> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() % self.segments.len() as u64) as usize;
        &self.segments[index]
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<Instant> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        }
    }

    /// Store `value`, evicting within the key's segment if needed
    pub fn set(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> RasResult<()> {
        let cost = entry_cost(key, &value);
        if cost > self.segment_capacity {
            return Err(RasError::EntryTooLarge {
                size: cost,
                limit: self.segment_capacity,
            });
        }

        let expires_at = self.expiry(ttl);
        let last_access = self.next_tick();
        let now = Instant::now();

        let mut segment = self.segment(key).lock();
        segment.remove(key);

        if segment.used + cost > self.segment_capacity {
            let purged = segment.purge_expired(now);
            self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        }

        while segment.used + cost > self.segment_capacity {
            let Some(victim) = segment.least_recently_used() else {
                break;
            };
            segment.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Ephemeral store evicted a live entry ({} key bytes) under capacity pressure",
                victim.len()
            );
        }

        segment.used += cost;
        segment.entries.insert(
            key.to_vec(),
            Entry {
                value,
                expires_at,
                last_access,
            },
        );
        Ok(())
    }

    /// Fetch a live value, refreshing its recency
    pub fn fetch(&self, key: &[u8]) -> RasResult<Vec<u8>> {
        let tick = self.next_tick();
        let mut segment = self.segment(key).lock();

        match segment.entries.get_mut(key) {
            None => return Err(RasError::KeyNotFound),
            Some(entry) if !entry.is_expired(Instant::now()) => {
                entry.last_access = tick;
                return Ok(entry.value.clone());
            }
            Some(_) => {}
        }

        segment.remove(key);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        Err(RasError::KeyNotFound)
    }

    /// Remove a key; expired entries count as absent
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut segment = self.segment(key).lock();
        match segment.remove(key) {
            Some(entry) => !entry.is_expired(Instant::now()),
            None => false,
        }
    }

    /// Drop every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let purged: usize = self
            .segments
            .iter()
            .map(|segment| segment.lock().purge_expired(now))
            .sum();
        if purged > 0 {
            self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
            debug!("Purged {} expired entries", purged);
        }
        purged
    }

    /// Entries currently held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let (entries, bytes_used) = self.segments.iter().fold((0, 0), |(n, b), s| {
            let s = s.lock();
            (n + s.entries.len(), b + s.used)
        });
        StoreStats {
            entries,
            bytes_used,
            capacity_bytes: self.segment_capacity * self.segments.len(),
            max_entry_bytes: self.segment_capacity,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl EphemeralStore for MemoryBox {
    async fn put(&self, key: &[u8], value: Vec<u8>, ttl: Option<Duration>) -> RasResult<()> {
        self.set(key, value, ttl)
    }

    async fn get(&self, key: &[u8]) -> RasResult<Vec<u8>> {
        self.fetch(key)
    }

    async fn delete(&self, key: &[u8]) -> RasResult<bool> {
        Ok(self.remove(key))
    }
}

/// Thread-safe store handle
pub type SharedMemoryBox = Arc<MemoryBox>;

/// Create a shared store from configuration
pub fn create_memory_box(config: &StoreConfig) -> SharedMemoryBox {
    Arc::new(MemoryBox::from_config(config))
}
