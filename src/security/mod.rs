//! Security Module
//!
//! Rate limiting for the chat route.

pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimiter};
