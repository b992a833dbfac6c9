//! Storage infrastructure - Storage implementations

mod factory;
mod in_memory;
mod postgres;

pub use factory::{StorageBackends, StorageConfig, StorageFactory, StorageType};
pub use in_memory::InMemoryStorage;
pub(crate) use postgres::map_sqlx_error;
pub use postgres::{PostgresConfig, PostgresStorage};
