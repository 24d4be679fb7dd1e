//! Single entry point combining the tiered cache and the attempt loop.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::attempt::{Execution, NetworkAttemptLoop, RequestOutcome, RetryPolicy};
use super::error::FetchError;
use super::slots::{SlotGuard, SlotRegistry, SlotTicket};
use super::transport::{RequestDescriptor, Transport, TransportResponse};
use crate::cache::{CacheHit, CacheTier, PersistentTier, TieredCache};

/// Per-call options for [`ResilientFetcher::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
  /// Cache key; without one the request is neither read from nor written to
  /// the cache
  pub cache_key: Option<String>,
  /// TTL for the written entry; defaults to the cache's default TTL
  pub ttl: Option<Duration>,
  /// Skip a live cache entry and go to the network
  pub force_refresh: bool,
  /// On exhausted retries, answer with the previous (expired) entry if any
  pub stale_on_error: bool,
  /// Logical slot this request occupies
  pub slot: Option<String>,
  /// Caller-level cancellation
  pub cancel: Option<CancellationToken>,
  /// Overrides the fetcher's retry policy
  pub retry: Option<RetryPolicy>,
}

impl FetchOptions {
  /// Options caching under `key`.
  pub fn cached(key: impl Into<String>) -> Self {
    Self {
      cache_key: Some(key.into()),
      ..Self::default()
    }
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn force_refresh(mut self, force: bool) -> Self {
    self.force_refresh = force;
    self
  }

  pub fn stale_on_error(mut self, stale: bool) -> Self {
    self.stale_on_error = stale;
    self
  }

  pub fn slot(mut self, slot: impl Into<String>) -> Self {
    self.slot = Some(slot.into());
    self
  }

  pub fn cancel_with(mut self, token: CancellationToken) -> Self {
    self.cancel = Some(token);
    self
  }

  pub fn retry(mut self, policy: RetryPolicy) -> Self {
    self.retry = Some(policy);
    self
  }
}

/// Indicates where the returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum ServedFrom {
  /// Live cache entry, no network activity
  Cache { tier: CacheTier },
  /// Fresh data from the network, or a 304 confirming the cached value
  Network,
  /// Retries ran out; serving the previous, expired entry
  StaleFallback,
}

/// A value together with metadata about how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
  pub value: Value,
  pub served_from: ServedFrom,
  /// Transport calls issued; 0 when served from cache
  pub attempts_used: u32,
  /// True when the server confirmed the cached value with a 304
  pub revalidated: bool,
}

/// Result of a fetch that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  Fetched(FetchResult),
  /// Cancelled by the caller or superseded in its slot. Not an error.
  Cancelled,
}

impl FetchOutcome {
  pub fn is_cancelled(&self) -> bool {
    matches!(self, FetchOutcome::Cancelled)
  }

  pub fn fetched(self) -> Option<FetchResult> {
    match self {
      FetchOutcome::Fetched(result) => Some(result),
      FetchOutcome::Cancelled => None,
    }
  }
}

/// Cache-first fetcher with retries, per-attempt timeouts and slot
/// cancellation.
pub struct ResilientFetcher<T: Transport, S: PersistentTier> {
  attempts: NetworkAttemptLoop<T>,
  cache: Arc<TieredCache<S>>,
  slots: SlotRegistry,
  policy: RetryPolicy,
}

impl<T: Transport, S: PersistentTier> ResilientFetcher<T, S> {
  pub fn new(transport: T, cache: Arc<TieredCache<S>>) -> Self {
    Self {
      attempts: NetworkAttemptLoop::new(transport),
      cache,
      slots: SlotRegistry::new(),
      policy: RetryPolicy::default(),
    }
  }

  /// Set the retry policy used when a fetch does not pass its own.
  pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn cache(&self) -> &TieredCache<S> {
    &self.cache
  }

  pub fn transport(&self) -> &T {
    self.attempts.transport()
  }

  /// Cancel the in-flight request of `slot`. Returns false if there was none.
  pub fn cancel(&self, slot: &str) -> bool {
    self.slots.cancel(slot)
  }

  /// Fetch `request`, serving from cache when possible.
  ///
  /// 1. With a live entry under `cache_key` (and no `force_refresh`), return
  ///    it without touching the network
  /// 2. Otherwise run the attempt loop, revalidating with the previous
  ///    entry's validator when it has one
  /// 3. Write successful responses through to the cache
  pub async fn fetch(
    &self,
    request: &RequestDescriptor,
    options: FetchOptions,
  ) -> Result<FetchOutcome, FetchError> {
    // Released on drop, so an abandoned fetch does not keep its slot
    let guard = options
      .slot
      .as_deref()
      .map(|slot| self.slots.enter(slot, options.cancel.as_ref()));
    let ticket = guard.as_ref().map(SlotGuard::ticket);

    let cancel = match (ticket, &options.cancel) {
      (Some(ticket), _) => ticket.token().clone(),
      (None, Some(cancel)) => cancel.clone(),
      (None, None) => CancellationToken::new(),
    };

    self.fetch_with(request, &options, &cancel, ticket).await
  }

  async fn fetch_with(
    &self,
    request: &RequestDescriptor,
    options: &FetchOptions,
    cancel: &CancellationToken,
    ticket: Option<&SlotTicket>,
  ) -> Result<FetchOutcome, FetchError> {
    let prior = options
      .cache_key
      .as_deref()
      .and_then(|key| self.cache.lookup(key));

    if let Some(hit) = &prior {
      if hit.fresh && !options.force_refresh {
        debug!(key = %hit.entry.key, tier = ?hit.tier, "serving from cache");
        return Ok(FetchOutcome::Fetched(FetchResult {
          value: hit.entry.value.clone(),
          served_from: ServedFrom::Cache { tier: hit.tier },
          attempts_used: 0,
          revalidated: false,
        }));
      }
    }

    let outgoing = match prior.as_ref().and_then(|hit| hit.entry.validator.as_deref()) {
      Some(validator) => request.clone().with_validator(validator),
      None => request.clone(),
    };

    let policy = options.retry.as_ref().unwrap_or(&self.policy);
    let Execution { outcome, attempts } = self.attempts.execute(&outgoing, policy, cancel).await;

    if ticket.is_some_and(|ticket| !self.slots.is_current(ticket)) {
      debug!(url = %request.url, "discarding result of superseded request");
      return Ok(FetchOutcome::Cancelled);
    }

    match outcome {
      RequestOutcome::Success(response) => self.commit(options, prior, response, attempts),
      RequestOutcome::Cancelled => Ok(FetchOutcome::Cancelled),
      RequestOutcome::Exhausted(error) | RequestOutcome::Retryable(error) => {
        match prior {
          Some(hit) if options.stale_on_error => {
            debug!(key = %hit.entry.key, error = %error, "network failed, serving stale entry");
            Ok(FetchOutcome::Fetched(FetchResult {
              value: hit.entry.value,
              served_from: ServedFrom::StaleFallback,
              attempts_used: attempts,
              revalidated: false,
            }))
          }
          _ => Err(FetchError::Exhausted {
            attempts,
            source: error,
          }),
        }
      }
    }
  }

  /// Write a successful response through to the cache.
  fn commit(
    &self,
    options: &FetchOptions,
    prior: Option<CacheHit>,
    response: TransportResponse,
    attempts: u32,
  ) -> Result<FetchOutcome, FetchError> {
    let revalidated = response.is_not_modified();

    let (value, validator) = if revalidated {
      let hit = prior.ok_or(FetchError::NotModifiedWithoutEntry)?;
      (hit.entry.value, response.validator.or(hit.entry.validator))
    } else {
      (response.body.unwrap_or(Value::Null), response.validator)
    };

    if let Some(key) = options.cache_key.as_deref() {
      let ttl = options.ttl.unwrap_or_else(|| self.cache.default_ttl());
      // A 304 refreshes expiry just like a full response
      self.cache.set(key, value.clone(), ttl, validator);
    }

    Ok(FetchOutcome::Fetched(FetchResult {
      value,
      served_from: ServedFrom::Network,
      attempts_used: attempts,
      revalidated,
    }))
  }
}
