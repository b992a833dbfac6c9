//! Rate limiting infrastructure

mod in_memory;
mod limiter;

pub use in_memory::{InMemoryRateLimitStore, InMemoryRateLimitStoreConfig};
pub use limiter::RateLimiter;
