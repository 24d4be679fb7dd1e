//! Two-tier TTL cache for response payloads.
//!
//! This module provides a transport-agnostic cache that:
//! - Keeps entries in a fast memory tier and a persistent SQLite tier
//! - Expires entries lazily on read once their TTL has passed
//! - Promotes persistent hits into memory
//! - Fails open: persistent-tier errors behave like an empty tier

mod key;
mod layer;
mod memory;
mod storage;
mod traits;

pub use key::RequestKey;
pub use layer::{TieredCache, DEFAULT_TTL};
pub use memory::MemoryTier;
pub use storage::{NoopStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheHit, CacheStats, CacheTier, EntrySummary, PersistentTier};
