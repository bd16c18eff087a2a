//! Scripted transport for exercising the facade without a server.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ApiResult;
use crate::executor::{ApiRequest, ApiResponse, Method, Transport};

type Responder = Box<dyn Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync>;
type Latency = Box<dyn Fn(&ApiRequest) -> Option<Duration> + Send + Sync>;

/// Records every request it sees and answers from a closure.
///
/// The answer is computed when the request arrives, so a delayed response
/// reflects server state at that moment.
pub struct ScriptedTransport {
  calls: Mutex<Vec<ApiRequest>>,
  respond: Responder,
  latency: Latency,
}

impl ScriptedTransport {
  pub fn new(respond: impl Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync + 'static) -> Arc<Self> {
    Self::with_latency(|_| None, respond)
  }

  /// Same, but every answer takes `delay` to arrive.
  pub fn slow(
    delay: Duration,
    respond: impl Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync + 'static,
  ) -> Arc<Self> {
    Self::with_latency(move |_| Some(delay), respond)
  }

  /// Only GET answers are delayed; writes return at once.
  pub fn slow_reads(
    delay: Duration,
    respond: impl Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync + 'static,
  ) -> Arc<Self> {
    Self::with_latency(move |request| (request.method == Method::Get).then_some(delay), respond)
  }

  fn with_latency(
    latency: impl Fn(&ApiRequest) -> Option<Duration> + Send + Sync + 'static,
    respond: impl Fn(&ApiRequest) -> ApiResult<ApiResponse> + Send + Sync + 'static,
  ) -> Arc<Self> {
    Arc::new(Self {
      calls: Mutex::new(Vec::new()),
      respond: Box::new(respond),
      latency: Box::new(latency),
    })
  }

  pub fn calls(&self) -> Vec<ApiRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn execute(&self, request: &ApiRequest) -> ApiResult<ApiResponse> {
    self.calls.lock().unwrap().push(request.clone());
    let response = (self.respond)(request);
    if let Some(delay) = (self.latency)(request) {
      tokio::time::sleep(delay).await;
    }
    response
  }
}

pub fn ok(body: Value) -> ApiResult<ApiResponse> {
  Ok(ApiResponse { status: 200, body })
}
