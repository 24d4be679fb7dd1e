//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// A memoized response payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  /// Caller-constructed fingerprint of the request
  pub key: String,
  /// Deserialized response payload
  pub value: Value,
  /// When the entry was written
  pub stored_at: DateTime<Utc>,
  /// The entry is logically absent from this instant on
  pub expires_at: DateTime<Utc>,
  /// Revalidation token (ETag) reported by the server, if any
  pub validator: Option<String>,
}

impl CacheEntry {
  /// Create an entry stored now that lives for `ttl`.
  pub fn new(key: impl Into<String>, value: Value, ttl: Duration, validator: Option<String>) -> Self {
    let stored_at = now_millis();
    Self {
      key: key.into(),
      value,
      stored_at,
      expires_at: expiry_after(stored_at, ttl),
      validator,
    }
  }

  /// Whether the entry is expired at `now`.
  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  pub fn is_expired(&self) -> bool {
    self.is_expired_at(Utc::now())
  }

  /// Rough in-memory footprint: key plus serialized value.
  pub fn approximate_size(&self) -> usize {
    self.key.len() + self.value.to_string().len()
  }

  pub(crate) fn summary(&self) -> EntrySummary {
    EntrySummary {
      key: self.key.clone(),
      expires_at: self.expires_at,
      size: self.approximate_size(),
    }
  }
}

/// Current time truncated to millisecond precision, the resolution the
/// persistent tier stores.
pub(crate) fn now_millis() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

fn expiry_after(stored_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(ttl)
    .ok()
    .and_then(|ttl| stored_at.checked_add_signed(ttl))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
  /// Process-local map
  Memory,
  /// Storage that survives restarts
  Persistent,
}

/// Result of a non-evicting cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
  pub entry: CacheEntry,
  /// Tier the entry was read from
  pub tier: CacheTier,
  /// False when the entry has passed its expiry
  pub fresh: bool,
}

/// Key, expiry and size of a stored entry, without its payload.
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub key: String,
  pub expires_at: DateTime<Utc>,
  pub size: usize,
}

/// Diagnostic snapshot of the cache contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub total_entries: usize,
  pub valid_entries: usize,
  pub expired_entries: usize,
  /// Bytes of keys and serialized values
  pub approximate_size: usize,
}

/// Trait for the slow, durable cache tier.
///
/// Failures are reported but the cache layer never propagates them: a failed
/// read is a miss and a failed write leaves the entry in memory only.
pub trait PersistentTier: Send + Sync {
  /// Read the entry stored under `key`.
  fn load(&self, key: &str) -> Result<Option<CacheEntry>>;

  /// Insert or replace an entry.
  fn store(&self, entry: &CacheEntry) -> Result<()>;

  /// Remove the entry stored under `key`, if any.
  fn remove(&self, key: &str) -> Result<()>;

  /// Remove everything and return the removed keys.
  fn clear(&self) -> Result<Vec<String>>;

  /// List stored entries without decoding their payloads.
  fn scan(&self) -> Result<Vec<EntrySummary>>;
}

impl<P: PersistentTier + ?Sized> PersistentTier for Box<P> {
  fn load(&self, key: &str) -> Result<Option<CacheEntry>> {
    (**self).load(key)
  }

  fn store(&self, entry: &CacheEntry) -> Result<()> {
    (**self).store(entry)
  }

  fn remove(&self, key: &str) -> Result<()> {
    (**self).remove(key)
  }

  fn clear(&self) -> Result<Vec<String>> {
    (**self).clear()
  }

  fn scan(&self) -> Result<Vec<EntrySummary>> {
    (**self).scan()
  }
}
