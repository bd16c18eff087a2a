//! Live update channel: push events folded into the view store.
//!
//! One reader task per connection forwards events to the store coordinator
//! in arrival order. There is no reconnect; once the channel is dead callers
//! must `connect()` again.

use chrono::{DateTime, Utc};
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::store::{EntityId, StoreCommand, StoreHandle};

/// An entity change pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveEvent {
  pub entity_type: String,
  pub entity_id: EntityId,
  #[serde(default)]
  pub payload: Value,
  #[serde(default = "Utc::now")]
  pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LiveError {
  #[error("failed to connect live channel: {0}")]
  Connect(String),
  #[error("live channel transport error: {0}")]
  Transport(String),
  #[error("malformed live event: {0}")]
  Decode(String),
}

/// Maps an event's entity type onto the view store collection it updates.
#[derive(Debug, Clone, Default)]
pub struct CollectionResolver {
  explicit: HashMap<String, String>,
}

impl CollectionResolver {
  pub fn new(explicit: HashMap<String, String>) -> Self {
    Self { explicit }
  }

  /// Explicit mapping first; otherwise `job` -> `jobs`, `jobs` stays `jobs`.
  pub fn collection_for(&self, entity_type: &str) -> String {
    if let Some(collection) = self.explicit.get(entity_type) {
      return collection.clone();
    }
    if entity_type.ends_with('s') {
      entity_type.to_string()
    } else {
      format!("{}s", entity_type)
    }
  }
}

pub struct LiveChannel;

impl LiveChannel {
  /// Open a websocket and start applying its events to `store`.
  pub async fn connect(
    url: &str,
    store: StoreHandle,
    collections: CollectionResolver,
  ) -> Result<LiveHandle, LiveError> {
    let (socket, _) = connect_async(url)
      .await
      .map_err(|e| LiveError::Connect(e.to_string()))?;
    info!(url, "Live channel connected");

    Ok(Self::from_stream(decode_frames(socket), store, collections))
  }

  /// Apply events from any source. The stream ending, or yielding a
  /// transport error, kills the channel; decode errors are skipped.
  pub fn from_stream<S>(events: S, store: StoreHandle, collections: CollectionResolver) -> LiveHandle
  where
    S: Stream<Item = Result<LiveEvent, LiveError>> + Send + 'static,
  {
    let (close_tx, mut close_rx) = oneshot::channel::<()>();
    let (dead_tx, dead_rx) = watch::channel(false);
    let applied = Arc::new(AtomicU64::new(0));
    let counter = applied.clone();

    let task = tokio::spawn(async move {
      let mut events = Box::pin(events);
      loop {
        tokio::select! {
          // Fires on close() and when the handle is dropped
          _ = &mut close_rx => {
            info!("Live channel closed");
            break;
          }
          next = events.next() => match next {
            Some(Ok(event)) => {
              let collection = collections.collection_for(&event.entity_type);
              debug!(
                collection = %collection,
                id = %event.entity_id,
                occurred_at = %event.occurred_at,
                "Live event"
              );
              let delivered = store.send(StoreCommand::Merge {
                collection,
                id: event.entity_id,
                payload: event.payload,
              });
              if !delivered {
                warn!("View store gone, stopping live channel");
                break;
              }
              counter.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(LiveError::Decode(reason))) => {
              warn!(reason = %reason, "Skipping malformed live event");
            }
            Some(Err(e)) => {
              warn!(error = %e, "Live channel failed");
              break;
            }
            None => {
              info!("Live channel disconnected");
              break;
            }
          }
        }
      }
      dead_tx.send_replace(true);
    });

    LiveHandle {
      close: Some(close_tx),
      dead: dead_rx,
      applied,
      task,
    }
  }
}

/// Turn websocket frames into events. Text frames carry JSON events; a
/// close frame ends the sequence.
fn decode_frames<S, E>(frames: S) -> impl Stream<Item = Result<LiveEvent, LiveError>>
where
  S: Stream<Item = Result<Message, E>>,
  E: std::fmt::Display,
{
  frames
    .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
    .filter_map(|frame| {
      future::ready(match frame {
        Ok(Message::Text(text)) => {
          Some(serde_json::from_str::<LiveEvent>(&text).map_err(|e| LiveError::Decode(e.to_string())))
        }
        Ok(_) => None,
        Err(e) => Some(Err(LiveError::Transport(e.to_string()))),
      })
    })
}

/// Owner of a running live channel. Dropping it closes the channel.
pub struct LiveHandle {
  close: Option<oneshot::Sender<()>>,
  dead: watch::Receiver<bool>,
  applied: Arc<AtomicU64>,
  task: JoinHandle<()>,
}

impl LiveHandle {
  pub fn is_alive(&self) -> bool {
    !*self.dead.borrow()
  }

  /// Number of events handed to the view store so far.
  pub fn events_applied(&self) -> u64 {
    self.applied.load(Ordering::Relaxed)
  }

  /// Resolve once the channel has died, for whatever reason.
  pub async fn closed(&mut self) {
    let _ = self.dead.wait_for(|dead| *dead).await;
  }

  /// Stop receiving and wait for the reader task to finish.
  pub async fn close(mut self) {
    if let Some(close) = self.close.take() {
      let _ = close.send(());
    }
    let _ = (&mut self.task).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::SinkExt;
  use serde_json::json;
  use std::time::Duration;
  use tokio::net::TcpListener;

  fn event(entity_type: &str, id: i64, payload: Value) -> LiveEvent {
    LiveEvent {
      entity_type: entity_type.to_string(),
      entity_id: EntityId::from(id),
      payload,
      occurred_at: Utc::now(),
    }
  }

  #[test]
  fn test_event_wire_format() {
    let raw = r#"{"entityType":"job","entityId":7,"payload":{"status":"closed"},"occurredAt":"2024-05-01T10:00:00Z"}"#;
    let event: LiveEvent = serde_json::from_str(raw).unwrap();
    assert_eq!(event.entity_type, "job");
    assert_eq!(event.entity_id, EntityId::Int(7));
    assert_eq!(event.payload, json!({"status": "closed"}));
  }

  #[test]
  fn test_collection_resolver() {
    let mut explicit = HashMap::new();
    explicit.insert("match".to_string(), "ai_matches".to_string());
    let resolver = CollectionResolver::new(explicit);

    assert_eq!(resolver.collection_for("job"), "jobs");
    assert_eq!(resolver.collection_for("candidates"), "candidates");
    assert_eq!(resolver.collection_for("match"), "ai_matches");
  }

  #[tokio::test]
  async fn test_event_updates_entity_without_fetch() {
    let (store, _task) = StoreHandle::spawn();
    let events = futures::stream::iter(vec![Ok(event("job", 7, json!({"status": "open"})))]);

    let mut handle = LiveChannel::from_stream(events, store.clone(), CollectionResolver::default());
    handle.closed().await;

    store.flush().await;
    assert_eq!(
      store.snapshot().entity("jobs", &EntityId::from(7)),
      Some(&json!({"id": 7, "status": "open"}))
    );
    assert_eq!(handle.events_applied(), 1);
    assert!(!handle.is_alive());
  }

  #[tokio::test]
  async fn test_events_apply_in_arrival_order_and_bad_frames_skip() {
    let (store, _task) = StoreHandle::spawn();
    let (tx, rx) = futures::channel::mpsc::unbounded();

    let mut handle = LiveChannel::from_stream(rx, store.clone(), CollectionResolver::default());
    tx.unbounded_send(Ok(event("job", 7, json!({"status": "open", "title": "Rust"})))).unwrap();
    tx.unbounded_send(Err(LiveError::Decode("garbage".into()))).unwrap();
    tx.unbounded_send(Ok(event("job", 7, json!({"status": "closed"})))).unwrap();
    drop(tx);

    handle.closed().await;
    store.flush().await;

    let snapshot = store.snapshot();
    assert_eq!(
      snapshot.entity("jobs", &EntityId::from(7)),
      Some(&json!({"id": 7, "title": "Rust", "status": "closed"}))
    );
    assert_eq!(handle.events_applied(), 2);
  }

  #[tokio::test]
  async fn test_transport_error_kills_channel() {
    let (store, _task) = StoreHandle::spawn();
    let events = futures::stream::iter(vec![
      Err(LiveError::Transport("reset by peer".into())),
      Ok(event("job", 1, json!({}))),
    ]);

    let mut handle = LiveChannel::from_stream(events, store, CollectionResolver::default());
    handle.closed().await;
    assert_eq!(handle.events_applied(), 0);
  }

  #[tokio::test]
  async fn test_close_stops_reader() {
    let (store, _task) = StoreHandle::spawn();
    let handle = LiveChannel::from_stream(futures::stream::pending(), store, CollectionResolver::default());
    assert!(handle.is_alive());
    tokio::time::timeout(Duration::from_secs(1), handle.close())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_websocket_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
      let frames = [
        r#"{"entityType":"candidate","entityId":3,"payload":{"first_name":"Ada"},"occurredAt":"2024-05-01T10:00:00Z"}"#,
        "not json",
        r#"{"entityType":"candidate","entityId":3,"payload":{"last_name":"Lovelace"},"occurredAt":"2024-05-01T10:00:01Z"}"#,
      ];
      for frame in frames {
        socket.send(Message::Text(frame.to_string().into())).await.unwrap();
      }
      socket.close(None).await.unwrap();
    });

    let (store, _task) = StoreHandle::spawn();
    let mut handle = LiveChannel::connect(&format!("ws://{}", addr), store.clone(), CollectionResolver::default())
      .await
      .unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle.closed())
      .await
      .unwrap();
    server.await.unwrap();
    store.flush().await;

    assert_eq!(handle.events_applied(), 2);
    assert_eq!(
      store.snapshot().entity("candidates", &EntityId::from(3)),
      Some(&json!({"id": 3, "first_name": "Ada", "last_name": "Lovelace"}))
    );
  }

  #[tokio::test]
  async fn test_connect_failure() {
    let (store, _task) = StoreHandle::spawn();
    let result = LiveChannel::connect("ws://127.0.0.1:9", store, CollectionResolver::default()).await;
    assert!(matches!(result, Err(LiveError::Connect(_))));
  }
}
