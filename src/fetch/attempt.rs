//! Retry loop: one logical request as a bounded series of timed, cancellable
//! attempts with exponential backoff.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use super::error::{AttemptError, TransportError};
use super::transport::{RequestDescriptor, Transport, TransportResponse};

/// Callback invoked before each backoff wait.
pub type RetryObserver = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Passed to the [`RetryObserver`] when an attempt failed and another follows.
#[derive(Debug)]
pub struct RetryEvent<'a> {
  /// 1-based number of the attempt that failed
  pub attempt: u32,
  pub max_retries: u32,
  /// Wait before the next attempt
  pub delay: Duration,
  pub error: &'a AttemptError,
}

/// Retry, backoff and timeout settings for one request.
#[derive(Clone)]
pub struct RetryPolicy {
  /// Retries after the first attempt; total attempts are `max_retries + 1`
  pub max_retries: u32,
  /// Delay before the second attempt, doubled for every further one
  pub base_delay: Duration,
  /// Budget for a single attempt
  pub timeout: Duration,
  on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_millis(500),
      timeout: Duration::from_secs(5),
      on_retry: None,
    }
  }
}

impl RetryPolicy {
  pub fn new(max_retries: u32, base_delay: Duration, timeout: Duration) -> Self {
    Self {
      max_retries,
      base_delay,
      timeout,
      on_retry: None,
    }
  }

  /// Register a callback that sees every retry decision.
  pub fn on_retry<F>(mut self, observer: F) -> Self
  where
    F: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
  {
    self.on_retry = Some(Arc::new(observer));
    self
  }

  /// Wait after the 0-based attempt `attempt`: `base_delay * 2^attempt`.
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    self
      .base_delay
      .saturating_mul(2u32.saturating_pow(attempt))
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetryPolicy")
      .field("max_retries", &self.max_retries)
      .field("base_delay", &self.base_delay)
      .field("timeout", &self.timeout)
      .field("on_retry", &self.on_retry.is_some())
      .finish()
  }
}

/// Result of an attempt, or of the whole loop.
///
/// `Retryable` classifies a single attempt; [`NetworkAttemptLoop::execute`]
/// never returns it, a final retryable failure becomes `Exhausted`.
#[derive(Debug)]
pub enum RequestOutcome {
  Success(TransportResponse),
  Retryable(AttemptError),
  Cancelled,
  Exhausted(AttemptError),
}

/// Outcome of [`NetworkAttemptLoop::execute`] and how many transport calls it
/// issued.
#[derive(Debug)]
pub struct Execution {
  pub outcome: RequestOutcome,
  pub attempts: u32,
}

/// Scope of a single attempt.
///
/// Owns the attempt's signal, a child of the caller's token. Dropping the
/// context cancels the signal, so nothing from a finished attempt can fire
/// into a later one.
struct AttemptContext {
  number: u32,
  signal: CancellationToken,
  _teardown: DropGuard,
}

impl AttemptContext {
  fn start(number: u32, parent: &CancellationToken) -> Self {
    let signal = parent.child_token();
    let teardown = signal.clone().drop_guard();
    Self {
      number,
      signal,
      _teardown: teardown,
    }
  }

  async fn run<T: Transport + ?Sized>(
    &self,
    transport: &T,
    request: &RequestDescriptor,
    external: &CancellationToken,
    timeout: Duration,
  ) -> RequestOutcome {
    if self.signal.is_cancelled() {
      return RequestOutcome::Cancelled;
    }

    // The timer lives in this future and is dropped with it
    let deadline = tokio::time::sleep(timeout);

    tokio::select! {
      biased;
      _ = external.cancelled() => RequestOutcome::Cancelled,
      result = transport.call(request, &self.signal) => classify(result, request, external),
      _ = deadline => {
        self.signal.cancel();
        RequestOutcome::Retryable(AttemptError::TimedOut(timeout))
      }
    }
  }
}

fn classify(
  result: Result<TransportResponse, TransportError>,
  request: &RequestDescriptor,
  external: &CancellationToken,
) -> RequestOutcome {
  match result {
    Ok(response) if response.is_success() => RequestOutcome::Success(response),
    Ok(response) if response.is_not_modified() && request.if_none_match().is_some() => {
      RequestOutcome::Success(response)
    }
    Ok(response) => RequestOutcome::Retryable(AttemptError::Status(response.status)),
    Err(TransportError::Cancelled) if external.is_cancelled() => RequestOutcome::Cancelled,
    Err(e) => RequestOutcome::Retryable(AttemptError::Transport(e)),
  }
}

/// Drives a [`Transport`] through retries.
pub struct NetworkAttemptLoop<T> {
  transport: T,
}

impl<T: Transport> NetworkAttemptLoop<T> {
  pub fn new(transport: T) -> Self {
    Self { transport }
  }

  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// Run `request` until it succeeds, is cancelled through `cancel`, or the
  /// policy's attempts are used up.
  ///
  /// Cancellation through `cancel` is never retried. Attempt timeouts,
  /// non-2xx statuses and transport errors are.
  pub async fn execute(
    &self,
    request: &RequestDescriptor,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
  ) -> Execution {
    let mut attempt = 0u32;

    loop {
      if cancel.is_cancelled() {
        return Execution {
          outcome: RequestOutcome::Cancelled,
          attempts: attempt,
        };
      }

      let outcome = {
        let context = AttemptContext::start(attempt + 1, cancel);
        debug!(attempt = context.number, url = %request.url, "starting attempt");
        context
          .run(&self.transport, request, cancel, policy.timeout)
          .await
      };
      let attempts = attempt + 1;

      let error = match outcome {
        RequestOutcome::Retryable(error) | RequestOutcome::Exhausted(error) => error,
        finished => {
          return Execution {
            outcome: finished,
            attempts,
          }
        }
      };

      if attempt >= policy.max_retries {
        debug!(attempts, error = %error, url = %request.url, "retries exhausted");
        return Execution {
          outcome: RequestOutcome::Exhausted(error),
          attempts,
        };
      }

      let delay = policy.backoff_delay(attempt);
      debug!(attempt = attempts, ?delay, error = %error, "attempt failed, backing off");
      if let Some(observer) = &policy.on_retry {
        observer(&RetryEvent {
          attempt: attempts,
          max_retries: policy.max_retries,
          delay,
          error: &error,
        });
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          return Execution {
            outcome: RequestOutcome::Cancelled,
            attempts,
          };
        }
        _ = tokio::time::sleep(delay) => {}
      }

      attempt += 1;
    }
  }
}
