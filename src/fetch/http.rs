use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ETAG;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::error::TransportError;
use super::transport::{RequestDescriptor, Transport, TransportResponse};

/// [`Transport`] over a `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
}

impl HttpTransport {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("resfetch/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// Use an already configured client (proxies, TLS roots, ...).
  pub fn with_client(client: reqwest::Client) -> Self {
    Self { client }
  }

  async fn exchange(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .header(reqwest::header::ACCEPT, "application/json");

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let validator = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(String::from);

    // Error bodies are not parsed; the status alone decides the outcome
    let body = if status.is_success() && status != StatusCode::NO_CONTENT {
      let bytes = response.bytes().await?;
      if bytes.is_empty() {
        None
      } else {
        let value = serde_json::from_slice(&bytes)
          .map_err(|e| TransportError::Body(format!("{} from {}", e, request.url)))?;
        Some(value)
      }
    } else {
      None
    };

    Ok(TransportResponse {
      status: status.as_u16(),
      body,
      validator,
    })
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn call(
    &self,
    request: &RequestDescriptor,
    signal: &CancellationToken,
  ) -> Result<TransportResponse, TransportError> {
    tokio::select! {
      _ = signal.cancelled() => Err(TransportError::Cancelled),
      result = self.exchange(request) => result,
    }
  }
}
