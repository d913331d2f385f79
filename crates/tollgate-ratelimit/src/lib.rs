//! Tollgate Rate Limiting - behavior ledger, adaptive limits and response headers.
//!
//! The [`AdaptiveLimiter`] scales each endpoint's static base limit by three
//! multipliers computed from the caller's [`BehaviorRecord`]:
//!
//! - **risk**: `max(0.1, 1 - risk/100)`
//! - **behavior**: error rate, average latency and the behavior pattern
//! - **recency**: idle callers gain headroom, rapid-fire callers lose it
//!
//! The product is rounded and clamped to the configured bounds. Records live
//! in the shared store behind a [`tollgate_store::CacheConnection`]; when the
//! store is unavailable the limiter falls back to the static base limit
//! rather than failing the request.
//!
//! Counting requests inside the current window is the caller's job: every
//! check takes the count as input.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod adaptive;
mod config;
mod decision;
mod headers;
mod ledger;
mod multipliers;
mod samples;

pub use adaptive::*;
pub use config::*;
pub use decision::*;
pub use headers::*;
pub use ledger::*;
pub use multipliers::*;
pub use samples::*;
