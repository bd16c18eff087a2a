//! Error taxonomy shared by every layer of the request path.

use serde_json::Value;

/// Failure of a single data-access call.
///
/// `Clone` because one in-flight fetch hands its result to every caller
/// awaiting the same key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
  /// Transport failure: no response was received (includes timeouts).
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("{message}")]
  Http {
    status: u16,
    message: String,
    body: Option<Value>,
  },

  /// The response body was not valid JSON.
  #[error("failed to decode response: {0}")]
  Decode(String),

  /// The payload failed client-side validation and was never sent.
  #[error("invalid request: {0}")]
  Invalid(String),

  /// A pipeline step rejected the request or response.
  #[error("interceptor rejected {phase}: {message}")]
  Interceptor { phase: Phase, message: String },
}

/// Which side of the pipeline produced an interceptor failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Request,
  Response,
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Phase::Request => f.write_str("request"),
      Phase::Response => f.write_str("response"),
    }
  }
}

impl ApiError {
  /// Build an `Http` error from a status and an optional decoded error body.
  ///
  /// The message comes from `message`, then `error`, then `detail`;
  /// otherwise a generic one is synthesized.
  pub fn http(status: u16, body: Option<Value>) -> Self {
    let message = body
      .as_ref()
      .and_then(|b| {
        ["message", "error", "detail"]
          .iter()
          .find_map(|field| b.get(*field).and_then(Value::as_str))
      })
      .map(String::from)
      .unwrap_or_else(|| format!("HTTP error, status {}", status));

    ApiError::Http {
      status,
      message,
      body,
    }
  }

  pub fn interceptor(phase: Phase, message: impl Into<String>) -> Self {
    ApiError::Interceptor {
      phase,
      message: message.into(),
    }
  }

  /// HTTP status of the failure, if the server responded.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_message_field_preferred() {
    let err = ApiError::http(
      400,
      Some(json!({"error": "Bad Request", "message": "title too short"})),
    );
    assert_eq!(err.to_string(), "title too short");
    assert_eq!(err.status(), Some(400));
  }

  #[test]
  fn test_detail_fallback() {
    let err = ApiError::http(422, Some(json!({"detail": "invalid salary range"})));
    assert_eq!(err.to_string(), "invalid salary range");
  }

  #[test]
  fn test_synthesized_message() {
    let err = ApiError::http(503, None);
    assert_eq!(err.to_string(), "HTTP error, status 503");

    let err = ApiError::http(500, Some(json!({"code": 7})));
    assert_eq!(err.to_string(), "HTTP error, status 500");
  }

  #[test]
  fn test_unauthorized() {
    assert!(ApiError::http(401, None).is_unauthorized());
    assert!(!ApiError::Network("refused".into()).is_unauthorized());
  }
}
