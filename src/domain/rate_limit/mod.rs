//! Rate limiting domain - short-horizon burst protection per API key

mod bucket;
mod store;

pub use bucket::{RateLimitConfig, RateLimitDecision, TokenBucket, MIN_REFILL_PER_SECOND};
pub use store::RateLimitStore;
