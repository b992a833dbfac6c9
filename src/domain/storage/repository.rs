//! Storage trait definition

use std::fmt::Debug;

use async_trait::async_trait;

use crate::domain::DomainError;

use super::entity::{StorageEntity, StorageKey};

/// Document storage for entities that are read far more often than written
#[async_trait]
pub trait Storage<E>: Send + Sync + Debug
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError>;

    async fn list(&self) -> Result<Vec<E>, DomainError>;

    /// Inserts a new entity, failing with `Conflict` if the key is taken
    async fn create(&self, entity: E) -> Result<E, DomainError>;

    /// Replaces an existing entity, failing with `NotFound` if absent
    async fn update(&self, entity: E) -> Result<E, DomainError>;

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError>;

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn count(&self) -> Result<usize, DomainError> {
        Ok(self.list().await?.len())
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Storage double that can be switched into an unreachable state
    #[derive(Debug)]
    pub struct MockStorage<E>
    where
        E: StorageEntity,
    {
        entities: Mutex<HashMap<String, E>>,
        unavailable: AtomicBool,
    }

    impl<E> Default for MockStorage<E>
    where
        E: StorageEntity,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<E> MockStorage<E>
    where
        E: StorageEntity,
    {
        pub fn new() -> Self {
            Self {
                entities: Mutex::new(HashMap::new()),
                unavailable: AtomicBool::new(false),
            }
        }

        pub fn with_entity(self, entity: E) -> Self {
            self.entities
                .lock()
                .unwrap()
                .insert(entity.key().as_str().to_string(), entity);
            self
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check_available(&self) -> Result<(), DomainError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(DomainError::unavailable("mock storage is unreachable"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl<E> Storage<E> for MockStorage<E>
    where
        E: StorageEntity + 'static,
    {
        async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
            self.check_available()?;
            Ok(self.entities.lock().unwrap().get(key.as_str()).cloned())
        }

        async fn list(&self) -> Result<Vec<E>, DomainError> {
            self.check_available()?;
            Ok(self.entities.lock().unwrap().values().cloned().collect())
        }

        async fn create(&self, entity: E) -> Result<E, DomainError> {
            self.check_available()?;
            let key = entity.key().as_str().to_string();
            let mut entities = self.entities.lock().unwrap();

            if entities.contains_key(&key) {
                return Err(DomainError::conflict(format!(
                    "Entity with key '{}' already exists",
                    key
                )));
            }

            entities.insert(key, entity.clone());
            Ok(entity)
        }

        async fn update(&self, entity: E) -> Result<E, DomainError> {
            self.check_available()?;
            let key = entity.key().as_str().to_string();
            let mut entities = self.entities.lock().unwrap();

            if !entities.contains_key(&key) {
                return Err(DomainError::not_found(format!(
                    "Entity with key '{}' not found",
                    key
                )));
            }

            entities.insert(key, entity.clone());
            Ok(entity)
        }

        async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
            self.check_available()?;
            Ok(self.entities.lock().unwrap().remove(key.as_str()).is_some())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::domain::quota::QuotaPolicy;
        use crate::domain::subscription::{Subscription, SubscriptionId};
        use chrono::Utc;

        fn subscription(id: &str) -> Subscription {
            Subscription::new(
                SubscriptionId::new(id).unwrap(),
                "buyer-1",
                "weather-api",
                QuotaPolicy::default(),
                Utc::now(),
            )
        }

        #[tokio::test]
        async fn test_create_then_conflict() {
            let storage: MockStorage<Subscription> = MockStorage::new();

            storage.create(subscription("sub-1")).await.unwrap();
            let err = storage.create(subscription("sub-1")).await.unwrap_err();

            assert!(matches!(err, DomainError::Conflict { .. }));
            assert_eq!(storage.count().await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_update_missing_is_not_found() {
            let storage: MockStorage<Subscription> = MockStorage::new();

            let err = storage.update(subscription("sub-1")).await.unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn test_unavailable_fails_every_call() {
            let storage = MockStorage::new().with_entity(subscription("sub-1"));
            storage.set_unavailable(true);

            let key = SubscriptionId::new("sub-1").unwrap();
            assert!(storage.get(&key).await.unwrap_err().is_unavailable());
            assert!(storage.list().await.unwrap_err().is_unavailable());

            storage.set_unavailable(false);
            assert!(storage.exists(&key).await.unwrap());
        }
    }
}
