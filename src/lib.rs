//! Client-side data access for the recruiting dashboard.
//!
//! [`Client`] is the facade: cache-first reads with in-flight
//! de-duplication, writes that invalidate what they touch, bearer auth,
//! request/response interceptors, and a [`store::ViewStore`] kept current by
//! fetches and the live update channel alike.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod live;
pub mod recruiting;
pub mod store;

#[cfg(test)]
mod testing;

pub use client::{Client, ClientBuilder, Lookup};
pub use error::{ApiError, ApiResult, Phase};
