//! Request executor: one request descriptor in, one decoded JSON payload out.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::{ApiError, ApiResult};

/// Query parameters. A `BTreeMap` so serialization order is canonical.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Patch,
  Put,
  Delete,
}

impl Method {
  /// Reads consult the cache; everything else bypasses and invalidates it.
  pub fn is_read(self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Patch => "PATCH",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Patch => reqwest::Method::PATCH,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A request as it travels through the interceptor pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the API base URL, always starting with `/`.
  pub endpoint: String,
  pub params: Params,
  pub body: Option<Value>,
  pub headers: BTreeMap<String, String>,
}

impl ApiRequest {
  pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
    let endpoint = endpoint.into();
    let endpoint = if endpoint.starts_with('/') {
      endpoint
    } else {
      format!("/{}", endpoint)
    };

    Self {
      method,
      endpoint,
      params: Params::new(),
      body: None,
      headers: BTreeMap::new(),
    }
  }

  pub fn get(endpoint: impl Into<String>) -> Self {
    Self::new(Method::Get, endpoint)
  }

  pub fn with_params(mut self, params: Params) -> Self {
    self.params = params;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  /// First path segment, i.e. the resource collection (`/jobs/7/status` -> `jobs`).
  pub fn resource(&self) -> &str {
    self
      .endpoint
      .trim_start_matches('/')
      .split(['/', '?'])
      .next()
      .unwrap_or_default()
  }
}

/// A successful response as seen by response interceptors.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

/// Performs exactly one network call per request. No retries.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn execute(&self, request: &ApiRequest) -> ApiResult<ApiResponse>;
}

/// reqwest-backed transport speaking JSON to the dashboard API.
#[derive(Clone)]
pub struct HttpExecutor {
  client: reqwest::Client,
  base_url: String,
}

impl HttpExecutor {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    // Validate once up front so per-request URL building can only fail on bad endpoints
    Url::parse(base_url).map_err(|e| eyre!("Invalid API base URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
    })
  }

  fn url_for(&self, request: &ApiRequest) -> ApiResult<Url> {
    let raw = format!("{}{}", self.base_url, request.endpoint);
    let mut url = Url::parse(&raw).map_err(|e| ApiError::Network(format!("bad URL {}: {}", raw, e)))?;

    if !request.params.is_empty() {
      url.query_pairs_mut().extend_pairs(request.params.iter());
    }

    Ok(url)
  }
}

#[async_trait]
impl Transport for HttpExecutor {
  async fn execute(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
    let url = self.url_for(request)?;
    debug!(method = request.method.as_str(), url = %url, "Dispatching request");

    let mut builder = self
      .client
      .request(request.method.into(), url)
      .header(ACCEPT, "application/json")
      .header(CONTENT_TYPE, "application/json");

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    let status = response.status();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| ApiError::Network(e.to_string()))?;

    if !status.is_success() {
      let body = serde_json::from_slice::<Value>(&bytes).ok();
      return Err(ApiError::http(status.as_u16(), body));
    }

    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))?
    };

    Ok(ApiResponse {
      status: status.as_u16(),
      body,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::matchers::{body_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn executor(server: &MockServer) -> HttpExecutor {
    HttpExecutor::new(&server.uri(), Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn test_get_decodes_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/jobs"))
      .and(query_param("status", "open"))
      .and(header("accept", "application/json"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
      .expect(1)
      .mount(&server)
      .await;

    let mut params = Params::new();
    params.insert("status".into(), "open".into());
    let response = executor(&server)
      .execute(&ApiRequest::get("/jobs").with_params(params))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn test_post_sends_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/jobs"))
      .and(body_json(json!({"title": "Rust engineer"})))
      .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
      .mount(&server)
      .await;

    let request = ApiRequest::new(Method::Post, "/jobs").with_body(json!({"title": "Rust engineer"}));
    let response = executor(&server).execute(&request).await.unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.body["id"], 9);
  }

  #[tokio::test]
  async fn test_http_error_carries_message() {
    let server = MockServer::start().await;
    Mock::given(path("/jobs/404"))
      .respond_with(
        ResponseTemplate::new(404).set_body_json(json!({"error": "Not Found", "message": "no such job"})),
      )
      .mount(&server)
      .await;

    let err = executor(&server)
      .execute(&ApiRequest::get("/jobs/404"))
      .await
      .unwrap_err();

    match err {
      ApiError::Http { status, message, body } => {
        assert_eq!(status, 404);
        assert_eq!(message, "no such job");
        assert!(body.is_some());
      }
      other => panic!("expected Http error, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_http_error_without_body() {
    let server = MockServer::start().await;
    Mock::given(path("/boom"))
      .respond_with(ResponseTemplate::new(500).set_body_string("<html>oops</html>"))
      .mount(&server)
      .await;

    let err = executor(&server)
      .execute(&ApiRequest::get("/boom"))
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "HTTP error, status 500");
  }

  #[tokio::test]
  async fn test_invalid_json_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(path("/jobs"))
      .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
      .mount(&server)
      .await;

    let err = executor(&server)
      .execute(&ApiRequest::get("/jobs"))
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
  }

  #[tokio::test]
  async fn test_empty_body_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
      .and(path("/jobs/3"))
      .respond_with(ResponseTemplate::new(204))
      .mount(&server)
      .await;

    let response = executor(&server)
      .execute(&ApiRequest::new(Method::Delete, "/jobs/3"))
      .await
      .unwrap();
    assert_eq!(response.body, Value::Null);
  }

  #[tokio::test]
  async fn test_timeout_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
      .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
      .mount(&server)
      .await;

    let executor = HttpExecutor::new(&server.uri(), Duration::from_millis(50)).unwrap();
    let err = executor.execute(&ApiRequest::get("/slow")).await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
  }

  #[tokio::test]
  async fn test_connection_refused_is_network_error() {
    let executor = HttpExecutor::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
    let err = executor.execute(&ApiRequest::get("/jobs")).await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
  }

  #[test]
  fn test_resource_segment() {
    assert_eq!(ApiRequest::get("/jobs/7/status").resource(), "jobs");
    assert_eq!(ApiRequest::get("candidates").resource(), "candidates");
  }

  #[test]
  fn test_invalid_base_url_rejected() {
    assert!(HttpExecutor::new("not a url", Duration::from_secs(1)).is_err());
  }
}
