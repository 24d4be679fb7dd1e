//! Stable cache keys for requests.

use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Fingerprint of a request: endpoint, query parameters and pagination cursor.
///
/// Parameter order does not affect the fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestKey {
  endpoint: String,
  params: Vec<(String, String)>,
  cursor: Option<String>,
}

impl RequestKey {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      ..Self::default()
    }
  }

  /// Add a query parameter. Repeated names are kept.
  pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.params.push((name.into(), value.into()));
    self
  }

  /// Set the pagination cursor (page number, offset token, ...).
  pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
    self.cursor = Some(cursor.into());
    self
  }

  /// SHA256 hex digest, stable and fixed-length.
  ///
  /// Every component is hashed with its length, so separators inside names,
  /// values or the cursor cannot make two requests collide.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, normalize_endpoint(&self.endpoint));

    let params = self.sorted_params();
    hasher.update((params.len() as u64).to_le_bytes());
    for (name, value) in &params {
      hash_field(&mut hasher, name);
      hash_field(&mut hasher, value);
    }

    match &self.cursor {
      Some(cursor) => {
        hasher.update([1u8]);
        hash_field(&mut hasher, cursor);
      }
      None => hasher.update([0u8]),
    }

    hex::encode(hasher.finalize())
  }

  /// Human readable form, used in logs.
  pub fn description(&self) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.sorted_params())
      .finish();

    match &self.cursor {
      Some(cursor) => format!(
        "{}?{}#{}",
        normalize_endpoint(&self.endpoint),
        query,
        form_urlencoded::byte_serialize(cursor.as_bytes()).collect::<String>()
      ),
      None => format!("{}?{}", normalize_endpoint(&self.endpoint), query),
    }
  }

  fn sorted_params(&self) -> Vec<(String, String)> {
    let mut params = self.params.clone();
    params.sort();
    params
  }
}

fn hash_field(hasher: &mut Sha256, field: &str) {
  hasher.update((field.len() as u64).to_le_bytes());
  hasher.update(field.as_bytes());
}

/// Trim whitespace and trailing slashes so `/items/` and `/items` match.
fn normalize_endpoint(endpoint: &str) -> &str {
  let trimmed = endpoint.trim();
  let stripped = trimmed.trim_end_matches('/');
  if stripped.is_empty() {
    trimmed
  } else {
    stripped
  }
}
