//! Storage domain - document storage for keys and subscriptions
//!
//! Usage counters do not go through this abstraction: they need a conditional
//! increment, see [`crate::domain::quota::UsageCounterStore`].

mod entity;
mod repository;

pub use entity::{StorageEntity, StorageKey};
pub use repository::Storage;

#[cfg(test)]
pub use repository::mock;
