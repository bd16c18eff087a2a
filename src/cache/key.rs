//! Cache key derivation.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::executor::{ApiRequest, Params};

/// Deterministic key for a read: the endpoint path, plus a digest of the
/// serialized params/body when there are any.
///
/// The path stays readable so a whole resource can be invalidated by prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(endpoint: &str, params: &Params, body: Option<&Value>) -> Self {
    let endpoint = endpoint.trim_end_matches('/');
    if params.is_empty() && body.is_none() {
      return Self(endpoint.to_string());
    }

    // BTreeMap params and serde_json's sorted object maps give a canonical encoding
    let canonical = serde_json::json!({ "params": params, "body": body }).to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Self(format!("{}?q={}", endpoint, digest))
  }

  pub fn for_request(request: &ApiRequest) -> Self {
    Self::new(&request.endpoint, &request.params, request.body.as_ref())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Segment-aware prefix match: `/jobs` covers `/jobs`, `/jobs/1` and
  /// `/jobs?q=..` but not `/jobsearch`.
  pub fn matches_prefix(&self, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match self.0.strip_prefix(prefix) {
      Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
      None => false,
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for CacheKey {
  fn from(key: &str) -> Self {
    Self(key.to_string())
  }
}
