//! Fast, process-local cache tier.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::traits::{CacheEntry, EntrySummary};

/// In-memory tier. Lost on restart, cheap to read.
#[derive(Default)]
pub struct MemoryTier {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    self.entries.lock().get(key).cloned()
  }

  /// Insert or replace the entry under its key.
  pub fn insert(&self, entry: CacheEntry) {
    self.entries.lock().insert(entry.key.clone(), entry);
  }

  pub fn remove(&self, key: &str) -> Option<CacheEntry> {
    self.entries.lock().remove(key)
  }

  /// Remove everything and return the removed keys.
  pub fn drain_keys(&self) -> Vec<String> {
    self.entries.lock().drain().map(|(key, _)| key).collect()
  }

  pub fn summaries(&self) -> Vec<EntrySummary> {
    self.entries.lock().values().map(CacheEntry::summary).collect()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::time::Duration;

  #[test]
  fn test_insert_overwrites_value_and_validator() {
    let tier = MemoryTier::new();
    tier.insert(CacheEntry::new("k", json!(1), Duration::from_secs(60), Some("v1".into())));
    tier.insert(CacheEntry::new("k", json!(2), Duration::from_secs(60), None));

    let entry = tier.get("k").unwrap();
    assert_eq!(entry.value, json!(2));
    assert_eq!(entry.validator, None);
    assert_eq!(tier.len(), 1);
  }

  #[test]
  fn test_drain_keys_empties_tier() {
    let tier = MemoryTier::new();
    tier.insert(CacheEntry::new("a", json!(1), Duration::from_secs(60), None));
    tier.insert(CacheEntry::new("b", json!(2), Duration::from_secs(60), None));

    let mut keys = tier.drain_keys();
    keys.sort();
    assert_eq!(keys, vec!["a", "b"]);
    assert!(tier.is_empty());
  }
}
