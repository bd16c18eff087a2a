//! Bearer credential handling.
//!
//! The token is loaded once from durable storage, then read synchronously
//! for every outgoing request. A 401 clears it and tells the UI to send the
//! user to the login entry point.

mod storage;

pub use storage::{MemoryTokenStore, SqliteTokenStore, TokenStore, TOKEN_KEY};

use color_eyre::Result;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::ApiResult;
use crate::executor::{ApiRequest, ApiResponse};

const AUTHORIZATION: &str = "Authorization";

/// In-memory holder of the current bearer token, backed by a [`TokenStore`].
pub struct CredentialStore {
  token: RwLock<Option<String>>,
  backing: Arc<dyn TokenStore>,
}

impl CredentialStore {
  pub fn new(backing: Arc<dyn TokenStore>) -> Self {
    Self {
      token: RwLock::new(None),
      backing,
    }
  }

  /// Load the persisted token into memory.
  pub fn init(&self) -> Result<()> {
    let stored = self.backing.load(TOKEN_KEY)?;
    *self.write() = stored;
    Ok(())
  }

  pub fn current(&self) -> Option<String> {
    self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
  }

  pub fn is_set(&self) -> bool {
    self.current().is_some()
  }

  /// Login: persist and hold the new token.
  pub fn set(&self, token: impl Into<String>) -> Result<()> {
    let token = token.into();
    self.backing.save(TOKEN_KEY, &token)?;
    *self.write() = Some(token);
    Ok(())
  }

  /// Logout or 401: forget the token in memory and on disk.
  pub fn clear(&self) -> Result<()> {
    *self.write() = None;
    self.backing.remove(TOKEN_KEY)
  }

  /// Forget the in-memory token only.
  pub fn reset(&self) {
    *self.write() = None;
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<String>> {
    self.token.write().unwrap_or_else(|e| e.into_inner())
  }
}

/// Signal asking the UI to navigate to the login entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
  /// Where to send the user
  pub path: String,
  /// Endpoint whose call came back unauthorized
  pub endpoint: String,
}

/// Attaches the bearer token and reacts to unauthorized responses.
pub struct AuthInjector {
  credentials: Arc<CredentialStore>,
  redirects: broadcast::Sender<LoginRedirect>,
  login_path: String,
}

impl AuthInjector {
  pub fn new(credentials: Arc<CredentialStore>, login_path: impl Into<String>) -> Self {
    let (redirects, _) = broadcast::channel(16);
    Self {
      credentials,
      redirects,
      login_path: login_path.into(),
    }
  }

  pub fn credentials(&self) -> &Arc<CredentialStore> {
    &self.credentials
  }

  pub fn subscribe(&self) -> broadcast::Receiver<LoginRedirect> {
    self.redirects.subscribe()
  }

  /// Add `Authorization: Bearer <token>` when a token is held. A header the
  /// caller set explicitly is left untouched.
  pub fn apply(&self, mut request: ApiRequest) -> ApiRequest {
    let caller_set = request
      .headers
      .keys()
      .any(|name| name.eq_ignore_ascii_case(AUTHORIZATION));

    if !caller_set {
      if let Some(token) = self.credentials.current() {
        request
          .headers
          .insert(AUTHORIZATION.to_string(), format!("Bearer {}", token));
      }
    }
    request
  }

  /// Inspect a call's outcome. On 401 the credential is cleared and one
  /// redirect is signalled; the error itself is left for the caller.
  pub fn observe(&self, request: &ApiRequest, result: &ApiResult<ApiResponse>) {
    let Err(err) = result else {
      return;
    };
    if !err.is_unauthorized() {
      return;
    }

    warn!(endpoint = %request.endpoint, "Unauthorized response, clearing credential");
    if let Err(e) = self.credentials.clear() {
      warn!(error = %e, "Failed to remove persisted credential");
    }

    // No receivers is fine: nobody is listening for navigation
    let _ = self.redirects.send(LoginRedirect {
      path: self.login_path.clone(),
      endpoint: request.endpoint.clone(),
    });
    info!(path = %self.login_path, "Login redirect signalled");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ApiError;
  use serde_json::Value;

  fn injector() -> (AuthInjector, Arc<MemoryTokenStore>) {
    let backing = Arc::new(MemoryTokenStore::new());
    let credentials = Arc::new(CredentialStore::new(backing.clone()));
    (AuthInjector::new(credentials, "/login"), backing)
  }

  #[test]
  fn test_header_attached_when_token_set() {
    let (auth, _) = injector();
    let request = auth.apply(ApiRequest::get("/jobs"));
    assert!(!request.headers.contains_key(AUTHORIZATION));

    auth.credentials().set("abc").unwrap();
    let request = auth.apply(ApiRequest::get("/jobs").with_header("X-Client", "desk"));
    assert_eq!(request.headers[AUTHORIZATION], "Bearer abc");
    assert_eq!(request.headers["X-Client"], "desk");
  }

  #[test]
  fn test_explicit_authorization_is_respected() {
    let (auth, _) = injector();
    auth.credentials().set("abc").unwrap();
    let request = auth.apply(ApiRequest::get("/jobs").with_header("authorization", "Basic xyz"));
    assert_eq!(request.headers.len(), 1);
    assert_eq!(request.headers["authorization"], "Basic xyz");
  }

  #[test]
  fn test_init_reads_durable_store() {
    let backing = Arc::new(MemoryTokenStore::new());
    backing.save(TOKEN_KEY, "persisted").unwrap();

    let credentials = CredentialStore::new(backing);
    assert!(!credentials.is_set());
    credentials.init().unwrap();
    assert_eq!(credentials.current().as_deref(), Some("persisted"));
  }

  #[test]
  fn test_unauthorized_clears_and_signals_once() {
    let (auth, backing) = injector();
    auth.credentials().set("expired").unwrap();
    let mut redirects = auth.subscribe();

    let request = ApiRequest::get("/jobs");
    auth.observe(&request, &Err(ApiError::http(401, None)));

    assert!(!auth.credentials().is_set());
    assert_eq!(backing.load(TOKEN_KEY).unwrap(), None);
    let redirect = redirects.try_recv().unwrap();
    assert_eq!(redirect.path, "/login");
    assert_eq!(redirect.endpoint, "/jobs");
    assert!(redirects.try_recv().is_err());
  }

  #[test]
  fn test_other_failures_leave_credential() {
    let (auth, _) = injector();
    auth.credentials().set("abc").unwrap();
    let mut redirects = auth.subscribe();

    let request = ApiRequest::get("/jobs");
    auth.observe(&request, &Err(ApiError::http(403, None)));
    auth.observe(
      &request,
      &Ok(ApiResponse {
        status: 200,
        body: Value::Null,
      }),
    );

    assert!(auth.credentials().is_set());
    assert!(redirects.try_recv().is_err());
  }

  #[test]
  fn test_reset_keeps_durable_copy() {
    let (auth, backing) = injector();
    auth.credentials().set("abc").unwrap();
    auth.credentials().reset();
    assert!(!auth.credentials().is_set());
    assert_eq!(backing.load(TOKEN_KEY).unwrap().as_deref(), Some("abc"));
  }
}
