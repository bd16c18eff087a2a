//! Core types describing cache results and per-key state.

use chrono::{DateTime, Utc};

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the served entry expires (if from cache)
  pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      expires_at: None,
    }
  }

  pub fn from_cache(data: T, expires_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      expires_at: Some(expires_at),
    }
  }

  /// Data delivered by a fetch another caller had already started.
  pub fn joined(data: T) -> Self {
    Self {
      data,
      source: CacheSource::InFlight,
      expires_at: None,
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// This call performed the network fetch
  Network,
  /// Served from a fresh cache entry
  Cache,
  /// Awaited a concurrent fetch for the same key
  InFlight,
}

/// Lifecycle of a single resource key.
///
/// `Unfetched -> Fetching -> Fresh -> Stale -> Fetching -> ...`
///
/// Invalidation and purging drop a key back to `Unfetched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
  Unfetched,
  Fetching,
  Fresh,
  /// Expired but not yet purged; the next read always refetches.
  Stale,
}
