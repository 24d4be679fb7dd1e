//! Resilient JSON fetching.
//!
//! A [`ResilientFetcher`] answers from a two-tier TTL cache when it can and
//! otherwise runs the request through a retry loop with exponential backoff,
//! per-attempt timeouts and cancellation of superseded requests.
//!
//! ```ignore
//! let cache = Arc::new(TieredCache::new(SqliteStorage::open_default()?));
//! let fetcher = ResilientFetcher::new(HttpTransport::new()?, cache);
//!
//! let request = RequestDescriptor::get("https://api.example.com/items?q=a")?;
//! let options = FetchOptions::cached("items:a").slot("list");
//! match fetcher.fetch(&request, options).await? {
//!     FetchOutcome::Fetched(result) => render(result.value),
//!     FetchOutcome::Cancelled => {} // superseded, nothing to show
//! }
//! ```

pub mod cache;
pub mod config;
pub mod fetch;

pub use cache::{CacheEntry, CacheStats, CacheTier, PersistentTier, SqliteStorage, TieredCache};
pub use config::Config;
pub use fetch::{
  FetchError, FetchOptions, FetchOutcome, FetchResult, HttpTransport, RequestDescriptor,
  ResilientFetcher, RetryPolicy, ServedFrom, Transport,
};
