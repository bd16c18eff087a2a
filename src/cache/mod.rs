//! In-memory response cache for read requests.
//!
//! This module provides:
//! - Deterministic keys derived from endpoint + serialized params
//! - Fixed TTL with per-key override and strict `now >= expires_at` expiry
//! - Invalidation by key or by resource prefix
//! - At most one concurrent fetch per key

mod clock;
mod key;
mod layer;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::CacheKey;
pub use layer::{CacheEntry, ResponseCache, DEFAULT_TTL_SECS};
pub use traits::{CacheResult, CacheSource, KeyState};
