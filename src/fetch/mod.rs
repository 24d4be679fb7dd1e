//! Resilient request execution on top of the tiered cache.
//!
//! - [`NetworkAttemptLoop`] turns one request into timed, cancellable attempts
//!   with exponential backoff
//! - [`ResilientFetcher`] puts the cache in front of the loop and handles
//!   conditional revalidation and slot supersession
//! - [`Transport`] is the only boundary; [`HttpTransport`] implements it with
//!   `reqwest`

mod attempt;
mod error;
mod fetcher;
mod http;
mod slots;
#[cfg(test)]
mod testing;
mod transport;

pub use attempt::{
  Execution, NetworkAttemptLoop, RequestOutcome, RetryEvent, RetryObserver, RetryPolicy,
};
pub use error::{AttemptError, FetchError, TransportError};
pub use fetcher::{FetchOptions, FetchOutcome, FetchResult, ResilientFetcher, ServedFrom};
pub use http::HttpTransport;
pub use slots::{SlotGuard, SlotRegistry, SlotTicket};
pub use transport::{RequestDescriptor, Transport, TransportResponse, IF_NONE_MATCH};
