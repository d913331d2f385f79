//! Tollgate Store - resilient connection to the shared TTL key-value store.
//!
//! Every other Tollgate component reads and writes shared state through a
//! [`CacheConnection`]. The connection:
//!
//! - retries transient failures with jittered exponential backoff
//! - probes liveness on a background task
//! - reconnects a bounded number of times, then fails fast
//! - reports every state transition to an injected [`tollgate_telemetry::AuditSink`]
//!
//! Backends are Redis (standalone or cluster) and an in-process store used
//! for single-node deployments and tests.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod backend;
mod backoff;
mod command;
mod config;
mod connection;
mod error;
mod memory;
mod redis_backend;

pub use backend::*;
pub use backoff::*;
pub use command::*;
pub use config::*;
pub use connection::*;
pub use error::*;
pub use memory::*;
pub use redis_backend::*;
