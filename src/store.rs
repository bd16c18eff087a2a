//! View store: the UI-visible collections, owned by a single coordinator task.
//!
//! Fetch results, write responses and live events are all sent as
//! [`StoreCommand`]s over one channel. The coordinator applies them in
//! arrival order (last write wins) and publishes a snapshot after each one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Entity identifier as the API sends it: numeric or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Text(String),
}

impl EntityId {
  /// Identifier of a JSON entity, taken from its `id` field.
  pub fn of(entity: &Value) -> Option<EntityId> {
    match entity.get("id")? {
      Value::Number(n) => n.as_i64().map(EntityId::Int),
      Value::String(s) => Some(EntityId::Text(s.clone())),
      _ => None,
    }
  }

  /// `7` and `"7"` name the same entity.
  pub fn matches(&self, entity: &Value) -> bool {
    EntityId::of(entity).is_some_and(|id| id.to_string() == self.to_string())
  }

  pub fn to_json(&self) -> Value {
    match self {
      EntityId::Int(n) => Value::from(*n),
      EntityId::Text(s) => Value::from(s.as_str()),
    }
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(n) => write!(f, "{}", n),
      EntityId::Text(s) => f.write_str(s),
    }
  }
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    EntityId::Int(id)
  }
}

impl From<i32> for EntityId {
  fn from(id: i32) -> Self {
    EntityId::Int(id.into())
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    id.parse().map(EntityId::Int).unwrap_or_else(|_| EntityId::Text(id.to_string()))
  }
}

impl From<String> for EntityId {
  fn from(id: String) -> Self {
    EntityId::from(id.as_str())
  }
}

/// Collection name -> ordered entities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewStore {
  collections: BTreeMap<String, Vec<Value>>,
}

impl ViewStore {
  pub fn collection(&self, name: &str) -> &[Value] {
    self.collections.get(name).map(Vec::as_slice).unwrap_or_default()
  }

  pub fn entity(&self, collection: &str, id: &EntityId) -> Option<&Value> {
    self.collection(collection).iter().find(|e| id.matches(e))
  }

  pub fn collection_names(&self) -> impl Iterator<Item = &str> {
    self.collections.keys().map(String::as_str)
  }

  fn replace_collection(&mut self, name: String, items: Vec<Value>) {
    self.collections.insert(name, items);
  }

  /// Replace the entity with the same id in place, or add it at the front.
  fn upsert(&mut self, name: String, entity: Value) {
    let items = self.collections.entry(name).or_default();
    let position = EntityId::of(&entity).and_then(|id| items.iter().position(|e| id.matches(e)));
    match position {
      Some(index) => items[index] = entity,
      None => items.insert(0, entity),
    }
  }

  /// Shallow-merge an object payload into an entity, creating it if absent.
  /// Non-object payloads replace the entity wholesale.
  fn merge(&mut self, name: String, id: EntityId, payload: Value) {
    let items = self.collections.entry(name).or_default();
    match items.iter().position(|e| id.matches(e)) {
      Some(index) => match (&mut items[index], payload) {
        (Value::Object(current), Value::Object(delta)) => {
          for (field, value) in delta {
            current.insert(field, value);
          }
        }
        (slot, payload) => *slot = with_id(payload, &id),
      },
      None => items.insert(0, with_id(payload, &id)),
    }
  }

  fn remove(&mut self, name: &str, id: &EntityId) {
    if let Some(items) = self.collections.get_mut(name) {
      items.retain(|e| !id.matches(e));
    }
  }

  fn apply(&mut self, command: StoreCommand) {
    match command {
      StoreCommand::ReplaceCollection { collection, items } => self.replace_collection(collection, items),
      StoreCommand::Upsert { collection, entity } => self.upsert(collection, entity),
      StoreCommand::Merge {
        collection,
        id,
        payload,
      } => self.merge(collection, id, payload),
      StoreCommand::Remove { collection, id } => self.remove(&collection, &id),
      StoreCommand::Clear => self.collections.clear(),
    }
  }
}

fn with_id(payload: Value, id: &EntityId) -> Value {
  match payload {
    Value::Object(mut fields) => {
      fields.entry("id").or_insert_with(|| id.to_json());
      Value::Object(fields)
    }
    Value::Null => {
      let mut fields = Map::new();
      fields.insert("id".to_string(), id.to_json());
      Value::Object(fields)
    }
    other => other,
  }
}

/// A single write to the view store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
  /// Result of a list read
  ReplaceCollection { collection: String, items: Vec<Value> },
  /// Server representation of one entity
  Upsert { collection: String, entity: Value },
  /// Live delta for one entity
  Merge {
    collection: String,
    id: EntityId,
    payload: Value,
  },
  Remove { collection: String, id: EntityId },
  Clear,
}

/// A command, or a bare barrier when `command` is `None`.
struct Envelope {
  command: Option<StoreCommand>,
  ack: Option<oneshot::Sender<()>>,
}

/// Cloneable handle to the coordinator task.
#[derive(Clone)]
pub struct StoreHandle {
  tx: mpsc::UnboundedSender<Envelope>,
  snapshots: watch::Receiver<Arc<ViewStore>>,
}

impl StoreHandle {
  /// Start the coordinator. It runs until every handle is dropped.
  pub fn spawn() -> (Self, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let (snapshot_tx, snapshots) = watch::channel(Arc::new(ViewStore::default()));

    let task = tokio::spawn(async move {
      let mut store = ViewStore::default();
      while let Some(envelope) = rx.recv().await {
        if let Some(command) = envelope.command {
          trace!(command = ?command, "Applying store command");
          store.apply(command);
          snapshot_tx.send_replace(Arc::new(store.clone()));
        }
        if let Some(ack) = envelope.ack {
          let _ = ack.send(());
        }
      }
      debug!("View store coordinator stopped");
    });

    (Self { tx, snapshots }, task)
  }

  /// Apply a command and wait until it is visible in snapshots.
  pub async fn apply(&self, command: StoreCommand) {
    self.acked(Some(command)).await;
  }

  /// Wait until every command queued before this call is visible.
  pub async fn flush(&self) {
    self.acked(None).await;
  }

  async fn acked(&self, command: Option<StoreCommand>) {
    let (ack, done) = oneshot::channel();
    let envelope = Envelope {
      command,
      ack: Some(ack),
    };
    if self.tx.send(envelope).is_ok() {
      let _ = done.await;
    }
  }

  /// Queue a command without waiting. Returns false once the coordinator is gone.
  pub fn send(&self, command: StoreCommand) -> bool {
    self
      .tx
      .send(Envelope {
        command: Some(command),
        ack: None,
      })
      .is_ok()
  }

  pub fn snapshot(&self) -> Arc<ViewStore> {
    self.snapshots.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<Arc<ViewStore>> {
    self.snapshots.clone()
  }
}
