//! Ordered request/response transform chain wrapped around the executor.
//!
//! Both chains run forward, in registration order. Response interceptors
//! see only successful responses; transport and HTTP failures bypass them.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

use crate::error::ApiResult;
use crate::executor::{ApiRequest, ApiResponse};

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
  async fn on_request(&self, request: ApiRequest) -> ApiResult<ApiRequest>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
  /// May rewrite the response, or turn a success into a failure.
  async fn on_response(&self, request: &ApiRequest, response: ApiResponse) -> ApiResult<ApiResponse>;
}

/// Adapter so plain closures can be registered as interceptors.
struct FnInterceptor<F>(F);

#[async_trait]
impl<F> RequestInterceptor for FnInterceptor<F>
where
  F: Fn(ApiRequest) -> ApiResult<ApiRequest> + Send + Sync,
{
  async fn on_request(&self, request: ApiRequest) -> ApiResult<ApiRequest> {
    (self.0)(request)
  }
}

struct FnResponseInterceptor<F>(F);

#[async_trait]
impl<F> ResponseInterceptor for FnResponseInterceptor<F>
where
  F: Fn(&ApiRequest, ApiResponse) -> ApiResult<ApiResponse> + Send + Sync,
{
  async fn on_response(&self, request: &ApiRequest, response: ApiResponse) -> ApiResult<ApiResponse> {
    (self.0)(request, response)
  }
}

/// Append-only chain of interceptors.
#[derive(Clone, Default)]
pub struct InterceptorChain {
  request: Vec<Arc<dyn RequestInterceptor>>,
  response: Vec<Arc<dyn ResponseInterceptor>>,
}

impl InterceptorChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_request_interceptor(&mut self, interceptor: impl RequestInterceptor + 'static) {
    self.request.push(Arc::new(interceptor));
  }

  pub fn register_response_interceptor(&mut self, interceptor: impl ResponseInterceptor + 'static) {
    self.response.push(Arc::new(interceptor));
  }

  pub fn register_request_fn<F>(&mut self, f: F)
  where
    F: Fn(ApiRequest) -> ApiResult<ApiRequest> + Send + Sync + 'static,
  {
    self.register_request_interceptor(FnInterceptor(f));
  }

  pub fn register_response_fn<F>(&mut self, f: F)
  where
    F: Fn(&ApiRequest, ApiResponse) -> ApiResult<ApiResponse> + Send + Sync + 'static,
  {
    self.register_response_interceptor(FnResponseInterceptor(f));
  }

  /// Run the request phase. The first failure aborts the chain.
  pub async fn apply_request(&self, mut request: ApiRequest) -> ApiResult<ApiRequest> {
    for (step, interceptor) in self.request.iter().enumerate() {
      trace!(step, endpoint = %request.endpoint, "Request interceptor");
      request = interceptor.on_request(request).await?;
    }
    Ok(request)
  }

  /// Run the response phase in the same (forward) order.
  pub async fn apply_response(&self, request: &ApiRequest, mut response: ApiResponse) -> ApiResult<ApiResponse> {
    for (step, interceptor) in self.response.iter().enumerate() {
      trace!(step, endpoint = %request.endpoint, "Response interceptor");
      response = interceptor.on_response(request, response).await?;
    }
    Ok(response)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{ApiError, Phase};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::time::Duration;

  fn tag_request(tag: &'static str) -> impl Fn(ApiRequest) -> ApiResult<ApiRequest> + Send + Sync + 'static {
    move |req| {
      let trail = req.headers.get("x-trail").cloned().unwrap_or_default();
      Ok(req.with_header("x-trail", format!("{}{}", trail, tag)))
    }
  }

  /// Async step that yields before tagging, to prove ordering survives suspension.
  struct SlowTag(&'static str);

  #[async_trait]
  impl RequestInterceptor for SlowTag {
    async fn on_request(&self, request: ApiRequest) -> ApiResult<ApiRequest> {
      tokio::time::sleep(Duration::from_millis(10)).await;
      let trail = request.headers.get("x-trail").cloned().unwrap_or_default();
      Ok(request.with_header("x-trail", format!("{}{}", trail, self.0)))
    }
  }

  #[tokio::test]
  async fn test_request_order_is_registration_order() {
    let mut chain = InterceptorChain::new();
    chain.register_request_interceptor(SlowTag("A"));
    chain.register_request_fn(tag_request("B"));

    let request = chain.apply_request(ApiRequest::get("/jobs")).await.unwrap();
    assert_eq!(request.headers["x-trail"], "AB");
  }

  #[tokio::test]
  async fn test_response_order_is_forward() {
    let mut chain = InterceptorChain::new();
    chain.register_response_fn(|_, mut resp| {
      resp.body["trail"] = json!(format!("{}C", resp.body["trail"].as_str().unwrap_or("")));
      Ok(resp)
    });
    chain.register_response_fn(|_, mut resp| {
      resp.body["trail"] = json!(format!("{}D", resp.body["trail"].as_str().unwrap_or("")));
      Ok(resp)
    });

    let response = ApiResponse {
      status: 200,
      body: json!({}),
    };
    let out = chain
      .apply_response(&ApiRequest::get("/jobs"), response)
      .await
      .unwrap();
    assert_eq!(out.body["trail"], "CD");
  }

  #[tokio::test]
  async fn test_failure_aborts_chain() {
    let ran_after = Arc::new(AtomicBool::new(false));
    let flag = ran_after.clone();

    let mut chain = InterceptorChain::new();
    chain.register_request_fn(|_| Err(ApiError::interceptor(Phase::Request, "blocked")));
    chain.register_request_fn(move |req| {
      flag.store(true, Ordering::SeqCst);
      Ok(req)
    });

    let err = chain.apply_request(ApiRequest::get("/jobs")).await.unwrap_err();
    assert!(matches!(err, ApiError::Interceptor { phase: Phase::Request, .. }));
    assert!(!ran_after.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_response_validation_can_reject() {
    let mut chain = InterceptorChain::new();
    chain.register_response_fn(|_, resp| {
      if resp.body.is_array() {
        Ok(resp)
      } else {
        Err(ApiError::interceptor(Phase::Response, "expected a list"))
      }
    });

    let response = ApiResponse {
      status: 200,
      body: Value::Null,
    };
    let err = chain
      .apply_response(&ApiRequest::get("/jobs"), response)
      .await
      .unwrap_err();
    assert_eq!(err.to_string(), "interceptor rejected response: expected a list");
  }
}
