//! Scripted transport shared by the fetch tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::TransportError;
use super::transport::{RequestDescriptor, Transport, TransportResponse};

#[derive(Clone, Debug)]
enum Reply {
  Respond(TransportResponse),
  Fail(String),
  /// Never answers; returns `Cancelled` once the signal fires
  Hang,
}

/// One scripted answer.
#[derive(Clone, Debug)]
pub(crate) struct Step {
  delay: Option<Duration>,
  observe_cancel: bool,
  reply: Reply,
}

impl Step {
  fn reply(reply: Reply) -> Self {
    Self {
      delay: None,
      observe_cancel: true,
      reply,
    }
  }

  pub(crate) fn ok(body: Value) -> Self {
    Self::respond(TransportResponse::ok(body))
  }

  pub(crate) fn respond(response: TransportResponse) -> Self {
    Self::reply(Reply::Respond(response))
  }

  pub(crate) fn status(status: u16) -> Self {
    Self::respond(TransportResponse::status(status))
  }

  pub(crate) fn fail(message: &str) -> Self {
    Self::reply(Reply::Fail(message.to_string()))
  }

  pub(crate) fn hang() -> Self {
    Self::reply(Reply::Hang)
  }

  pub(crate) fn after(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  /// Keep sleeping through cancellation, like a transport that cannot be
  /// interrupted.
  pub(crate) fn ignoring_cancel(mut self) -> Self {
    self.observe_cancel = false;
    self
  }
}

/// A recorded call.
#[derive(Clone, Debug)]
pub(crate) struct Call {
  pub(crate) at: Instant,
  pub(crate) if_none_match: Option<String>,
  pub(crate) signal: CancellationToken,
}

/// Transport that plays queued steps, then repeats a fallback step.
pub(crate) struct ScriptedTransport {
  script: Mutex<VecDeque<Step>>,
  fallback: Step,
  calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
  pub(crate) fn new(fallback: Step) -> Self {
    Self {
      script: Mutex::new(VecDeque::new()),
      fallback,
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Queue a step to play before the fallback.
  pub(crate) fn then(self, step: Step) -> Self {
    self.script.lock().push_back(step);
    self
  }

  pub(crate) fn calls(&self) -> Vec<Call> {
    self.calls.lock().clone()
  }

  pub(crate) fn call_count(&self) -> usize {
    self.calls.lock().len()
  }

  pub(crate) fn call_times(&self) -> Vec<Instant> {
    self.calls().into_iter().map(|c| c.at).collect()
  }

  pub(crate) fn signals(&self) -> Vec<CancellationToken> {
    self.calls().into_iter().map(|c| c.signal).collect()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn call(
    &self,
    request: &RequestDescriptor,
    signal: &CancellationToken,
  ) -> Result<TransportResponse, TransportError> {
    let step = self
      .script
      .lock()
      .pop_front()
      .unwrap_or_else(|| self.fallback.clone());

    self.calls.lock().push(Call {
      at: Instant::now(),
      if_none_match: request.if_none_match().map(String::from),
      signal: signal.clone(),
    });

    if let Some(delay) = step.delay {
      if step.observe_cancel {
        tokio::select! {
          _ = signal.cancelled() => return Err(TransportError::Cancelled),
          _ = tokio::time::sleep(delay) => {}
        }
      } else {
        tokio::time::sleep(delay).await;
      }
    }

    match step.reply {
      Reply::Respond(response) => Ok(response),
      Reply::Fail(message) => Err(TransportError::Connection(message)),
      Reply::Hang => {
        signal.cancelled().await;
        Err(TransportError::Cancelled)
      }
    }
  }
}
