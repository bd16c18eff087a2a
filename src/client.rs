//! Data-access facade: the single entry point the UI calls.
//!
//! Reads go cache-first with in-flight de-duplication; writes bypass the
//! cache, invalidate the affected resource and merge the server's answer
//! into the view store.

use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use futures::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::auth::{AuthInjector, CredentialStore, LoginRedirect, MemoryTokenStore, TokenStore};
use crate::cache::{CacheKey, CacheResult, CacheSource, Clock, KeyState, ResponseCache, SystemClock};
use crate::config::Config;
use crate::error::ApiResult;
use crate::executor::{ApiRequest, HttpExecutor, Method, Params, Transport};
use crate::interceptor::{InterceptorChain, RequestInterceptor, ResponseInterceptor};
use crate::live::{CollectionResolver, LiveChannel, LiveError, LiveEvent, LiveHandle};
use crate::store::{EntityId, StoreCommand, StoreHandle, ViewStore};

/// How a `get` addresses its resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
  /// `/resource/<id>`
  Id(EntityId),
  /// `/resource?<params>`
  Params(Params),
}

impl From<EntityId> for Lookup {
  fn from(id: EntityId) -> Self {
    Lookup::Id(id)
  }
}

impl From<i64> for Lookup {
  fn from(id: i64) -> Self {
    Lookup::Id(EntityId::Int(id))
  }
}

impl From<i32> for Lookup {
  fn from(id: i32) -> Self {
    Lookup::Id(EntityId::from(id))
  }
}

impl From<&str> for Lookup {
  fn from(id: &str) -> Self {
    Lookup::Id(EntityId::from(id))
  }
}

impl From<Params> for Lookup {
  fn from(params: Params) -> Self {
    Lookup::Params(params)
  }
}

/// What a response does to the view store.
#[derive(Debug, Clone)]
enum ViewMerge {
  /// List read: the array becomes the collection
  Replace,
  /// Single-entity read or write
  Upsert(Option<EntityId>),
  /// Entity is gone
  Remove(EntityId),
  /// Leave the view store alone
  Skip,
}

pub struct ClientBuilder {
  base_url: Option<String>,
  timeout: std::time::Duration,
  transport: Option<Arc<dyn Transport>>,
  token_store: Option<Arc<dyn TokenStore>>,
  clock: Arc<dyn Clock>,
  ttl: Duration,
  ttl_overrides: HashMap<String, Duration>,
  login_path: String,
  sweep_interval: Option<std::time::Duration>,
  collections: CollectionResolver,
  interceptors: InterceptorChain,
}

impl Default for ClientBuilder {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout: std::time::Duration::from_secs(30),
      transport: None,
      token_store: None,
      clock: Arc::new(SystemClock),
      ttl: Duration::seconds(crate::cache::DEFAULT_TTL_SECS),
      ttl_overrides: HashMap::new(),
      login_path: "/login".to_string(),
      sweep_interval: None,
      collections: CollectionResolver::default(),
      interceptors: InterceptorChain::new(),
    }
  }
}

impl ClientBuilder {
  pub fn from_config(config: &Config) -> Self {
    Self {
      base_url: Some(config.api.base_url.clone()),
      timeout: config.api.timeout(),
      ttl: config.cache.ttl(),
      login_path: config.api.login_path.clone(),
      sweep_interval: config.cache.sweep_interval(),
      collections: CollectionResolver::new(config.live.collections.clone()),
      ..Self::default()
    }
  }

  pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = Some(base_url.into());
    self
  }

  /// Replace HTTP with another transport.
  pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
    self.token_store = Some(store);
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// TTL for every read of one resource, e.g. slow-moving analytics.
  pub fn ttl_for(mut self, resource: impl Into<String>, ttl: Duration) -> Self {
    self.ttl_overrides.insert(resource.into(), ttl);
    self
  }

  pub fn login_path(mut self, path: impl Into<String>) -> Self {
    self.login_path = path.into();
    self
  }

  pub fn sweep_interval(mut self, every: Option<std::time::Duration>) -> Self {
    self.sweep_interval = every;
    self
  }

  pub fn collections(mut self, collections: CollectionResolver) -> Self {
    self.collections = collections;
    self
  }

  pub fn request_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
    self.interceptors.register_request_interceptor(interceptor);
    self
  }

  pub fn response_interceptor(mut self, interceptor: impl ResponseInterceptor + 'static) -> Self {
    self.interceptors.register_response_interceptor(interceptor);
    self
  }

  pub fn interceptors(mut self, register: impl FnOnce(&mut InterceptorChain)) -> Self {
    register(&mut self.interceptors);
    self
  }

  /// Build the facade. Must run inside a tokio runtime: it starts the view
  /// store coordinator and, if configured, the cache sweeper.
  pub fn build(self) -> Result<Client> {
    let transport = match self.transport {
      Some(transport) => transport,
      None => {
        let base_url = self
          .base_url
          .ok_or_else(|| eyre!("Client needs either a base URL or a transport"))?;
        Arc::new(HttpExecutor::new(&base_url, self.timeout)?)
      }
    };

    let token_store = self
      .token_store
      .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
    let credentials = Arc::new(CredentialStore::new(token_store));
    credentials.init()?;

    let cache = ResponseCache::with_clock(self.clock).with_default_ttl(self.ttl);
    let (store, _coordinator) = StoreHandle::spawn();
    let sweeper = self.sweep_interval.map(|every| cache.spawn_sweeper(every));

    Ok(Client {
      inner: Arc::new(ClientInner {
        transport,
        auth: AuthInjector::new(credentials, self.login_path),
        cache,
        interceptors: self.interceptors,
        store,
        ttl_overrides: self.ttl_overrides,
        collections: self.collections,
        sweeper,
      }),
    })
  }
}

struct ClientInner {
  transport: Arc<dyn Transport>,
  auth: AuthInjector,
  cache: ResponseCache,
  interceptors: InterceptorChain,
  store: StoreHandle,
  ttl_overrides: HashMap<String, Duration>,
  collections: CollectionResolver,
  sweeper: Option<JoinHandle<()>>,
}

impl Drop for ClientInner {
  fn drop(&mut self) {
    if let Some(sweeper) = &self.sweeper {
      sweeper.abort();
    }
  }
}

impl ClientInner {
  /// Request pipeline -> auth -> executor -> 401 check -> response pipeline.
  async fn execute(&self, request: ApiRequest) -> ApiResult<Value> {
    let request = self.interceptors.apply_request(request).await?;
    let request = self.auth.apply(request);

    let result = self.transport.execute(&request).await;
    self.auth.observe(&request, &result);

    let response = self.interceptors.apply_response(&request, result?).await?;
    Ok(response.body)
  }

  async fn merge_into_view(&self, collection: &str, merge: &ViewMerge, value: &Value) {
    for command in view_commands(collection, merge, value) {
      self.store.apply(command).await;
    }
  }
}

/// Translate a response into view store writes.
fn view_commands(collection: &str, merge: &ViewMerge, value: &Value) -> Vec<StoreCommand> {
  let upsert = |entity: Value| StoreCommand::Upsert {
    collection: collection.to_string(),
    entity,
  };

  match (merge, value) {
    (ViewMerge::Skip, _) => Vec::new(),
    (ViewMerge::Remove(id), _) => vec![StoreCommand::Remove {
      collection: collection.to_string(),
      id: id.clone(),
    }],
    (ViewMerge::Replace, Value::Array(items)) => vec![StoreCommand::ReplaceCollection {
      collection: collection.to_string(),
      items: items.clone(),
    }],
    // Filtered single reads may answer with several entities
    (_, Value::Array(items)) => items
      .iter()
      .filter(|e| EntityId::of(e).is_some())
      .cloned()
      .map(upsert)
      .collect(),
    (ViewMerge::Upsert(Some(id)), Value::Object(fields)) => {
      let mut fields = fields.clone();
      fields.entry("id").or_insert_with(|| id.to_json());
      vec![upsert(Value::Object(fields))]
    }
    (_, entity @ Value::Object(_)) if EntityId::of(entity).is_some() => vec![upsert(entity.clone())],
    _ => Vec::new(),
  }
}

/// Cloneable handle to one data-access layer instance.
#[derive(Clone)]
pub struct Client {
  inner: Arc<ClientInner>,
}

impl Client {
  pub fn builder() -> ClientBuilder {
    ClientBuilder::default()
  }

  fn endpoint(resource: &str, id: Option<&EntityId>) -> String {
    let resource = resource.trim_matches('/');
    match id {
      Some(id) => format!("/{}/{}", resource, id),
      None => format!("/{}", resource),
    }
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Read one entity by id, or the resource filtered by params.
  pub async fn get(&self, resource: &str, lookup: impl Into<Lookup>) -> ApiResult<Value> {
    let (request, merge) = match lookup.into() {
      Lookup::Id(id) => (
        ApiRequest::get(Self::endpoint(resource, Some(&id))),
        ViewMerge::Upsert(Some(id)),
      ),
      Lookup::Params(params) => (
        ApiRequest::get(Self::endpoint(resource, None)).with_params(params),
        ViewMerge::Upsert(None),
      ),
    };
    Ok(self.read_into(request, merge).await?.data)
  }

  /// Read a collection; the result becomes the view store's collection.
  pub async fn list(&self, resource: &str, params: Params) -> ApiResult<Value> {
    let request = ApiRequest::get(Self::endpoint(resource, None)).with_params(params);
    Ok(self.read_into(request, ViewMerge::Replace).await?.data)
  }

  /// Cache-first read of an arbitrary GET, reporting where the data came from.
  /// The view store is not touched.
  pub async fn read(&self, request: ApiRequest) -> ApiResult<CacheResult<Value>> {
    self.read_into(request, ViewMerge::Skip).await
  }

  #[instrument(skip_all, fields(endpoint = %request.endpoint))]
  async fn read_into(&self, request: ApiRequest, merge: ViewMerge) -> ApiResult<CacheResult<Value>> {
    let key = CacheKey::for_request(&request);
    let collection = request.resource().to_string();
    let ttl = self.inner.ttl_overrides.get(&collection).copied();

    let inner = Arc::clone(&self.inner);
    let store = self.inner.store.clone();
    let result = self
      .inner
      .cache
      .get_or_fetch_with(
        &key,
        ttl,
        move || async move { inner.execute(request).await },
        // Runs under the cache lock for a fetch no write has detached, so the
        // commands queue ahead of that write's own merge
        move |value| {
          for command in view_commands(&collection, &merge, value) {
            store.send(command);
          }
        },
      )
      .await?;
    if result.source != CacheSource::Cache {
      self.inner.store.flush().await;
    }

    debug!(key = %key, source = ?result.source, "Read complete");
    Ok(result)
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  pub async fn create(&self, resource: &str, body: Value) -> ApiResult<Value> {
    let request = ApiRequest::new(Method::Post, Self::endpoint(resource, None)).with_body(body);
    self.write(request, ViewMerge::Upsert(None)).await
  }

  /// Partial update (PATCH).
  pub async fn update(&self, resource: &str, id: impl Into<EntityId>, patch: Value) -> ApiResult<Value> {
    let id = id.into();
    let request = ApiRequest::new(Method::Patch, Self::endpoint(resource, Some(&id))).with_body(patch);
    self.write(request, ViewMerge::Upsert(Some(id))).await
  }

  /// Full replacement (PUT).
  pub async fn replace(&self, resource: &str, id: impl Into<EntityId>, body: Value) -> ApiResult<Value> {
    let id = id.into();
    let request = ApiRequest::new(Method::Put, Self::endpoint(resource, Some(&id))).with_body(body);
    self.write(request, ViewMerge::Upsert(Some(id))).await
  }

  pub async fn delete(&self, resource: &str, id: impl Into<EntityId>) -> ApiResult<Value> {
    let id = id.into();
    let request = ApiRequest::new(Method::Delete, Self::endpoint(resource, Some(&id)));
    self.write(request, ViewMerge::Remove(id)).await
  }

  /// Run any request. Reads go through the cache; writes invalidate the
  /// resource named by the first path segment and upsert the response.
  pub async fn invoke(&self, request: ApiRequest) -> ApiResult<Value> {
    if request.method.is_read() {
      return Ok(self.read(request).await?.data);
    }
    self.write(request, ViewMerge::Upsert(None)).await
  }

  #[instrument(skip_all, fields(method = request.method.as_str(), endpoint = %request.endpoint))]
  async fn write(&self, request: ApiRequest, merge: ViewMerge) -> ApiResult<Value> {
    let collection = request.resource().to_string();
    let result = self.inner.execute(request).await;

    // Invalidate even on failure: a timed-out write may still have landed
    let removed = self.inner.cache.invalidate_prefix(&format!("/{}", collection));
    debug!(collection = %collection, removed, "Invalidated after write");

    let value = result?;
    self.inner.merge_into_view(&collection, &merge, &value).await;
    Ok(value)
  }

  // ==========================================================================
  // Credentials & lifecycle
  // ==========================================================================

  pub fn login(&self, token: impl Into<String>) -> Result<()> {
    self.inner.auth.credentials().set(token)?;
    info!("Logged in");
    Ok(())
  }

  pub fn logout(&self) -> Result<()> {
    self.inner.auth.credentials().clear()?;
    self.inner.cache.reset();
    info!("Logged out");
    Ok(())
  }

  pub fn is_logged_in(&self) -> bool {
    self.inner.auth.credentials().is_set()
  }

  /// Drop cached data, in-flight bookkeeping, the in-memory credential and
  /// the view store contents. The durable credential is kept.
  pub async fn reset(&self) {
    self.inner.cache.reset();
    self.inner.auth.credentials().reset();
    self.inner.store.apply(StoreCommand::Clear).await;
  }

  /// Fires once per call that came back 401.
  pub fn login_redirects(&self) -> broadcast::Receiver<LoginRedirect> {
    self.inner.auth.subscribe()
  }

  // ==========================================================================
  // View store & cache inspection
  // ==========================================================================

  pub fn snapshot(&self) -> Arc<ViewStore> {
    self.inner.store.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<Arc<ViewStore>> {
    self.inner.store.subscribe()
  }

  pub fn cache(&self) -> &ResponseCache {
    &self.inner.cache
  }

  pub fn key_state(&self, resource: &str, lookup: impl Into<Lookup>) -> KeyState {
    let request = match lookup.into() {
      Lookup::Id(id) => ApiRequest::get(Self::endpoint(resource, Some(&id))),
      Lookup::Params(params) => ApiRequest::get(Self::endpoint(resource, None)).with_params(params),
    };
    self.inner.cache.state(&CacheKey::for_request(&request))
  }

  // ==========================================================================
  // Live updates
  // ==========================================================================

  pub async fn connect_live(&self, url: &str) -> Result<LiveHandle, LiveError> {
    LiveChannel::connect(url, self.inner.store.clone(), self.inner.collections.clone()).await
  }

  /// Feed events from an arbitrary source into this client's view store.
  pub fn attach_live<S>(&self, events: S) -> LiveHandle
  where
    S: Stream<Item = Result<LiveEvent, LiveError>> + Send + 'static,
  {
    LiveChannel::from_stream(events, self.inner.store.clone(), self.inner.collections.clone())
  }
}
