//! Storage factory for runtime backend selection

use std::sync::Arc;

use serde::Deserialize;
use sqlx::postgres::PgPool;
use tracing::info;

use crate::domain::api_key::ApiKey;
use crate::domain::quota::UsageCounterStore;
use crate::domain::storage::{Storage, StorageEntity};
use crate::domain::subscription::Subscription;
use crate::domain::DomainError;
use crate::infrastructure::quota::{InMemoryUsageCounterStore, PostgresUsageCounterStore};

use super::in_memory::InMemoryStorage;
use super::postgres::{PostgresConfig, PostgresStorage};

/// Supported storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    /// In-memory storage (for testing/development)
    #[default]
    InMemory,
    /// PostgreSQL storage
    Postgres,
}

impl StorageType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" | "in_memory" => Some(Self::InMemory),
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Storage configuration section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `postgres`
    pub backend: String,
    pub postgres: PostgresConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            postgres: PostgresConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn postgres_url(url: impl Into<String>) -> Self {
        Self {
            backend: "postgres".to_string(),
            postgres: PostgresConfig::new(url),
        }
    }

    pub fn storage_type(&self) -> Result<StorageType, DomainError> {
        StorageType::from_str(&self.backend).ok_or_else(|| {
            DomainError::configuration(format!("Unknown storage backend '{}'", self.backend))
        })
    }
}

/// Every store the service needs, built against one backend
#[derive(Debug, Clone)]
pub struct StorageBackends {
    pub api_keys: Arc<dyn Storage<ApiKey>>,
    pub subscriptions: Arc<dyn Storage<Subscription>>,
    pub counters: Arc<dyn UsageCounterStore>,
    /// Present for PostgreSQL; used by readiness checks
    pub pool: Option<PgPool>,
}

/// Factory for creating storage instances
#[derive(Debug)]
pub struct StorageFactory;

impl StorageFactory {
    /// Builds all stores for the configured backend
    pub async fn build(config: &StorageConfig) -> Result<StorageBackends, DomainError> {
        match config.storage_type()? {
            StorageType::InMemory => {
                info!("Using in-memory storage");
                Ok(Self::in_memory())
            }
            StorageType::Postgres => {
                info!(
                    max_connections = config.postgres.max_connections,
                    "Using PostgreSQL storage"
                );
                let pool = config.postgres.connect().await?;

                let counters = PostgresUsageCounterStore::new(pool.clone());
                counters.ensure_table().await?;

                Ok(StorageBackends {
                    api_keys: Self::postgres_table(&pool, "api_keys").await?,
                    subscriptions: Self::postgres_table(&pool, "subscriptions").await?,
                    counters: Arc::new(counters),
                    pool: Some(pool),
                })
            }
        }
    }

    /// In-memory stores, for tests and single-process runs
    pub fn in_memory() -> StorageBackends {
        StorageBackends {
            api_keys: Arc::new(InMemoryStorage::<ApiKey>::new()),
            subscriptions: Arc::new(InMemoryStorage::<Subscription>::new()),
            counters: Arc::new(InMemoryUsageCounterStore::new()),
            pool: None,
        }
    }

    async fn postgres_table<E>(
        pool: &PgPool,
        table_name: &str,
    ) -> Result<Arc<dyn Storage<E>>, DomainError>
    where
        E: StorageEntity + 'static,
    {
        let storage = PostgresStorage::<E>::new(pool.clone(), table_name);
        storage.ensure_table().await?;
        Ok(Arc::new(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_from_str() {
        assert_eq!(StorageType::from_str("memory"), Some(StorageType::InMemory));
        assert_eq!(StorageType::from_str("In-Memory"), Some(StorageType::InMemory));
        assert_eq!(StorageType::from_str("postgres"), Some(StorageType::Postgres));
        assert_eq!(StorageType::from_str("pg"), Some(StorageType::Postgres));
        assert_eq!(StorageType::from_str("redis"), None);
    }

    #[test]
    fn test_storage_config_types() {
        assert_eq!(
            StorageConfig::in_memory().storage_type().unwrap(),
            StorageType::InMemory
        );
        assert_eq!(
            StorageConfig::postgres_url("postgres://localhost/test")
                .storage_type()
                .unwrap(),
            StorageType::Postgres
        );

        let unknown = StorageConfig {
            backend: "sqlite".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            unknown.storage_type(),
            Err(DomainError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_in_memory() {
        let backends = StorageFactory::build(&StorageConfig::in_memory())
            .await
            .unwrap();

        assert!(backends.pool.is_none());
        assert_eq!(backends.api_keys.count().await.unwrap(), 0);
    }
}
