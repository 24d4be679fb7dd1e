use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use resfetch::cache::{NoopStorage, PersistentTier, SqliteStorage, TieredCache};
use resfetch::{
  CacheTier, Config, FetchOptions, FetchOutcome, HttpTransport, RequestDescriptor, ResilientFetcher,
  ServedFrom,
};

type Cache = TieredCache<Box<dyn PersistentTier>>;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch a JSON resource, answering from the cache when possible
  Get {
    url: String,

    /// Cache key (default: derived from method, URL and query)
    #[arg(short, long)]
    key: Option<String>,

    /// Time-to-live of the cached response in milliseconds
    #[arg(long)]
    ttl_ms: Option<u64>,

    /// Ignore a live cache entry
    #[arg(short, long)]
    force: bool,

    /// Serve the expired entry when every attempt fails
    #[arg(long)]
    stale_on_error: bool,

    /// Extra request header
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    headers: Vec<String>,
  },

  /// Print cache statistics as JSON
  Stats,

  /// Remove every cache entry
  Clear,

  /// Remove one cache entry
  Delete { key: String },
}

pub async fn run(command: Command, config: &Config, memory_only: bool) -> Result<()> {
  let cache = Arc::new(open_cache(config, memory_only)?);

  match command {
    Command::Get {
      url,
      key,
      ttl_ms,
      force,
      stale_on_error,
      headers,
    } => {
      let mut request = RequestDescriptor::get(&url)?;
      for header in &headers {
        let (name, value) = parse_header(header)?;
        request = request.header(name, value);
      }

      let key = key.unwrap_or_else(|| request.cache_key());
      let mut options = FetchOptions::cached(key)
        .force_refresh(force)
        .stale_on_error(stale_on_error);
      if let Some(ttl) = ttl_ms {
        options = options.ttl(Duration::from_millis(ttl));
      }

      get(cache, config, &request, options).await
    }
    Command::Stats => {
      println!("{}", serde_json::to_string_pretty(&cache.stats())?);
      Ok(())
    }
    Command::Clear => {
      println!("removed {} entries", cache.clear());
      Ok(())
    }
    Command::Delete { key } => {
      cache.delete(&key);
      Ok(())
    }
  }
}

async fn get(
  cache: Arc<Cache>,
  config: &Config,
  request: &RequestDescriptor,
  options: FetchOptions,
) -> Result<()> {
  let policy = config.retry.policy().on_retry(|event| {
    eprintln!(
      "attempt {}/{} failed: {} (retrying in {:?})",
      event.attempt,
      event.max_retries + 1,
      event.error,
      event.delay
    );
  });
  let fetcher = ResilientFetcher::new(HttpTransport::new()?, cache).with_retry_policy(policy);

  // Ctrl-C cancels the request instead of killing the process mid-write
  let cancel = CancellationToken::new();
  let interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      interrupt.cancel();
    }
  });

  match fetcher.fetch(request, options.cancel_with(cancel)).await? {
    FetchOutcome::Fetched(result) => {
      eprintln!(
        "{} • attempts:{}{}",
        describe_source(result.served_from),
        result.attempts_used,
        if result.revalidated { " • not modified" } else { "" }
      );
      println!("{}", serde_json::to_string_pretty(&result.value)?);
    }
    FetchOutcome::Cancelled => eprintln!("cancelled"),
  }

  Ok(())
}

fn open_cache(config: &Config, memory_only: bool) -> Result<Cache> {
  let storage: Box<dyn PersistentTier> = if memory_only || !config.cache.persistent {
    Box::new(NoopStorage)
  } else {
    match SqliteStorage::open(&config.cache.database_path()?) {
      Ok(storage) => Box::new(storage),
      Err(e) => {
        warn!(error = %e, "persistent cache unavailable, using memory only");
        Box::new(NoopStorage)
      }
    }
  };

  Ok(TieredCache::new(storage).with_default_ttl(config.cache.ttl()))
}

fn describe_source(served_from: ServedFrom) -> &'static str {
  match served_from {
    ServedFrom::Cache {
      tier: CacheTier::Memory,
    } => "cache:memory",
    ServedFrom::Cache {
      tier: CacheTier::Persistent,
    } => "cache:persistent",
    ServedFrom::Network => "network",
    ServedFrom::StaleFallback => "stale",
  }
}

/// Split a `Name: value` header argument.
fn parse_header(raw: &str) -> Result<(&str, &str)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", raw))?;

  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Invalid header '{}', name is empty", raw));
  }

  Ok((name, value.trim()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_header() {
    assert_eq!(
      parse_header("Accept: application/json").unwrap(),
      ("Accept", "application/json")
    );
    assert_eq!(parse_header("X-Token:abc:def").unwrap(), ("X-Token", "abc:def"));
  }

  #[test]
  fn test_parse_header_rejects_malformed() {
    assert!(parse_header("no-colon").is_err());
    assert!(parse_header(": value").is_err());
  }

  #[test]
  fn test_describe_source() {
    assert_eq!(
      describe_source(ServedFrom::Cache {
        tier: CacheTier::Persistent
      }),
      "cache:persistent"
    );
    assert_eq!(describe_source(ServedFrom::Network), "network");
  }

  #[test]
  fn test_memory_only_cache_has_no_persistent_tier() {
    let cache = open_cache(&Config::default(), true).unwrap();
    cache.set("k", serde_json::json!(1), Duration::from_secs(60), None);
    assert_eq!(cache.persistent().scan().unwrap().len(), 0);
    assert_eq!(cache.stats().total_entries, 1);
  }
}
