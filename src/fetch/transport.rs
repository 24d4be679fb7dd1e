//! The transport boundary: request descriptors, responses and the trait the
//! attempt loop calls.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::error::TransportError;
use crate::cache::RequestKey;

/// Header carrying the cached validator on revalidation requests.
pub const IF_NONE_MATCH: &str = "If-None-Match";

/// Everything needed to issue one HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  /// JSON body, sent with `Content-Type: application/json`
  pub body: Option<Value>,
}

impl RequestDescriptor {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  /// Build a GET request, parsing `url`.
  pub fn get(url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
    Ok(Self::new(Method::GET, url))
  }

  /// Add a header. An existing header with the same name is replaced.
  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    let name = name.into();
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
    self.headers.push((name, value.into()));
    self
  }

  pub fn json(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Ask the server to answer 304 if `validator` still matches.
  pub fn with_validator(self, validator: &str) -> Self {
    self.header(IF_NONE_MATCH, validator)
  }

  pub fn header_value(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// The validator this request is conditional on, if any.
  pub fn if_none_match(&self) -> Option<&str> {
    self.header_value(IF_NONE_MATCH)
  }

  /// Default cache key: method, origin and path plus the query pairs.
  pub fn cache_key(&self) -> String {
    let endpoint = format!(
      "{} {}{}",
      self.method,
      self.url.origin().ascii_serialization(),
      self.url.path()
    );

    self
      .url
      .query_pairs()
      .fold(RequestKey::new(endpoint), |key, (name, value)| {
        key.param(name, value)
      })
      .fingerprint()
  }
}

/// What came back from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  /// Parsed JSON body; absent for empty, 304 and error responses
  pub body: Option<Value>,
  /// `ETag` of the response
  pub validator: Option<String>,
}

impl TransportResponse {
  pub fn ok(body: Value) -> Self {
    Self {
      status: 200,
      body: Some(body),
      validator: None,
    }
  }

  pub fn status(status: u16) -> Self {
    Self {
      status,
      body: None,
      validator: None,
    }
  }

  pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
    self.validator = Some(validator.into());
    self
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_not_modified(&self) -> bool {
    self.status == 304
  }
}

/// Something that can perform a request.
///
/// Implementations should watch `signal` and return
/// [`TransportError::Cancelled`] once it fires. The attempt loop stops waiting
/// on the call regardless, but cooperative transports release their
/// connection sooner.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn call(
    &self,
    request: &RequestDescriptor,
    signal: &CancellationToken,
  ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
  async fn call(
    &self,
    request: &RequestDescriptor,
    signal: &CancellationToken,
  ) -> Result<TransportResponse, TransportError> {
    (**self).call(request, signal).await
  }
}
