//! Tollgate Trust - IP and CIDR trust evaluation.
//!
//! Decides whether a caller address bypasses rate limits fully (trusted
//! address or range), partially (bypass-eligible endpoint or internal
//! network), or not at all. Evaluation is pure given the loaded entries.
//!
//! # Example
//!
//! ```rust
//! use tollgate_trust::{TrustConfig, TrustEvaluator, TrustLevel};
//!
//! let config = TrustConfig {
//!     trusted: vec!["10.0.0.0/8".into()],
//!     ..TrustConfig::default()
//! };
//! let evaluator = TrustEvaluator::from_config(&config).unwrap();
//!
//! assert_eq!(evaluator.check_trust("10.1.2.3", None).level, TrustLevel::Full);
//! assert_eq!(evaluator.check_trust("8.8.8.8", None).level, TrustLevel::None);
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod entry;
mod evaluator;
mod ranges;

pub use entry::*;
pub use evaluator::*;
pub use ranges::*;
