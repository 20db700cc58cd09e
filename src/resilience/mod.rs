//! # Resilience Module
//!
//! Rate and concurrency budgeting for external sources.
//!
//! ## Architecture
//!
//! - **Token Bucket**: monotonic, clock-injected refill math
//! - **Rate Governor**: the only component that mutates per-source token and
//!   slot counts; everything else goes through [`RateGovernor::acquire`]
//! - **Configuration**: one [`SourceBudget`] per registered source

pub mod config;
pub mod rate_governor;
pub mod token_bucket;

pub use config::SourceBudget;
pub use rate_governor::{Admission, RateGovernor, SourceGateSnapshot, SourcePermit, WouldBlock};
pub use token_bucket::TokenBucket;
