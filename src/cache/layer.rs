//! Two-tier cache combining the memory tier with a persistent tier.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::memory::MemoryTier;
use super::storage::NoopStorage;
use super::traits::{CacheEntry, CacheHit, CacheStats, CacheTier, PersistentTier};

/// Default time-to-live for entries written without an explicit TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache with a fast memory tier in front of a persistent tier.
///
/// Reads consult memory first and promote persistent hits into memory.
/// Persistent-tier failures never reach the caller: a failed read is a miss
/// and a failed write leaves the entry cached in memory only.
pub struct TieredCache<S: PersistentTier> {
  memory: MemoryTier,
  persistent: S,
  default_ttl: Duration,
}

impl TieredCache<NoopStorage> {
  /// Cache without a persistent tier.
  pub fn memory_only() -> Self {
    Self::new(NoopStorage)
  }
}

impl<S: PersistentTier> TieredCache<S> {
  /// Create a new cache with the given persistent tier.
  pub fn new(persistent: S) -> Self {
    Self {
      memory: MemoryTier::new(),
      persistent,
      default_ttl: DEFAULT_TTL,
    }
  }

  /// Set the TTL used when a caller does not pass one.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  pub fn persistent(&self) -> &S {
    &self.persistent
  }

  /// Find an entry without evicting it when expired.
  ///
  /// A live persistent hit is promoted into the memory tier.
  pub fn lookup(&self, key: &str) -> Option<CacheHit> {
    let now = Utc::now();

    if let Some(entry) = self.memory.get(key) {
      let fresh = !entry.is_expired_at(now);
      return Some(CacheHit {
        entry,
        tier: CacheTier::Memory,
        fresh,
      });
    }

    let entry = match self.persistent.load(key) {
      Ok(Some(entry)) => entry,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "persistent cache read failed, treating as miss");
        return None;
      }
    };

    let fresh = !entry.is_expired_at(now);
    if fresh {
      debug!(key, "promoting persistent cache entry to memory");
      self.memory.insert(entry.clone());
    }

    Some(CacheHit {
      entry,
      tier: CacheTier::Persistent,
      fresh,
    })
  }

  /// Get a live entry. Expired entries are deleted from both tiers.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    let hit = self.lookup(key)?;
    if hit.fresh {
      return Some(hit.entry);
    }

    debug!(key, "cache entry expired");
    self.delete(key);
    None
  }

  /// Write an entry to both tiers, replacing any previous one.
  pub fn set(
    &self,
    key: &str,
    value: Value,
    ttl: Duration,
    validator: Option<String>,
  ) -> CacheEntry {
    let entry = CacheEntry::new(key, value, ttl, validator);
    self.memory.insert(entry.clone());

    if let Err(e) = self.persistent.store(&entry) {
      warn!(key, error = %e, "persistent cache write failed, entry kept in memory only");
    }

    entry
  }

  /// Remove an entry from both tiers.
  pub fn delete(&self, key: &str) {
    self.memory.remove(key);

    if let Err(e) = self.persistent.remove(key) {
      warn!(key, error = %e, "persistent cache delete failed");
    }
  }

  /// Remove every entry from both tiers, returning how many distinct keys
  /// were removed.
  pub fn clear(&self) -> usize {
    let mut removed = self.memory.drain_keys();

    match self.persistent.clear() {
      Ok(keys) => removed.extend(keys),
      Err(e) => warn!(error = %e, "persistent cache clear failed"),
    }

    removed.sort_unstable();
    removed.dedup();
    debug!(count = removed.len(), "cache cleared");
    removed.len()
  }

  /// Summarize both tiers. Never evicts.
  pub fn stats(&self) -> CacheStats {
    let now = Utc::now();

    let mut summaries: HashMap<String, _> = HashMap::new();
    match self.persistent.scan() {
      Ok(rows) => summaries.extend(rows.into_iter().map(|s| (s.key.clone(), s))),
      Err(e) => warn!(error = %e, "persistent cache scan failed"),
    }
    // The memory copy wins when both tiers hold a key
    summaries.extend(self.memory.summaries().into_iter().map(|s| (s.key.clone(), s)));

    summaries
      .values()
      .fold(CacheStats::default(), |mut stats, summary| {
        stats.total_entries += 1;
        if now >= summary.expires_at {
          stats.expired_entries += 1;
        } else {
          stats.valid_entries += 1;
        }
        stats.approximate_size += summary.size;
        stats
      })
  }
}
