//! Tollgate - adaptive admission control.
//!
//! Decides per request whether to admit it, how many requests the caller may
//! make in the current window, and whether the caller bypasses limits because
//! it comes from a trusted network.
//!
//! ```text
//! AdmissionRequest ─▶ TrustEvaluator ──(full)──▶ bypass decision
//!                          │
//!                          └──(partial: raised base / none)──▶ AdaptiveLimiter ◀─▶ CacheConnection
//!                                                                     │
//!                                                                     ▼
//!                                                         RateDecision + response headers
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tollgate::{Admission, AdmissionConfig, AdmissionRequest};
//! use tollgate_telemetry::TracingAuditSink;
//!
//! let config = AdmissionConfig::load("tollgate.toml")?;
//! let admission = Admission::start(config, Arc::new(TracingAuditSink)).await?;
//!
//! let decision = admission
//!     .check(&AdmissionRequest::new("user-42", "/api/login", "203.0.113.7", 3))
//!     .await;
//! if !decision.allowed {
//!     // answer 429 with decision.headers
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod admission;
mod config;

pub use admission::*;
pub use config::*;

pub use tollgate_ratelimit as ratelimit;
pub use tollgate_store as store;
pub use tollgate_telemetry as telemetry;
pub use tollgate_trust as trust;
