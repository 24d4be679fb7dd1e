use std::time::Duration;

/// Failure reported by a [`Transport`](super::Transport) call.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("Invalid response body: {0}")]
  Body(String),

  #[error("Connection error: {0}")]
  Connection(String),

  /// The call observed its cancellation signal and gave up.
  #[error("Request was cancelled")]
  Cancelled,
}

/// Why a single attempt failed. Every variant is retryable.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
  #[error("Attempt timed out after {0:?}")]
  TimedOut(Duration),

  #[error("Server returned status code {0}")]
  Status(u16),

  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// Failure surfaced by [`ResilientFetcher::fetch`](super::ResilientFetcher::fetch).
///
/// Cancellation is not an error; it is reported as
/// [`FetchOutcome::Cancelled`](super::FetchOutcome::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("Request failed after {attempts} attempt(s): {source}")]
  Exhausted {
    attempts: u32,
    #[source]
    source: AttemptError,
  },

  #[error("Server answered 304 Not Modified but nothing is cached for the request")]
  NotModifiedWithoutEntry,
}

impl FetchError {
  /// The last attempt's error, when retries ran out.
  pub fn last_error(&self) -> Option<&AttemptError> {
    match self {
      FetchError::Exhausted { source, .. } => Some(source),
      FetchError::NotModifiedWithoutEntry => None,
    }
  }
}
