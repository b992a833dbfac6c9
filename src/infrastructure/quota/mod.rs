//! Usage counter store implementations

mod in_memory;
mod postgres;

pub use in_memory::InMemoryUsageCounterStore;
pub use postgres::PostgresUsageCounterStore;
