//! Storage-backed API key repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyRepository};
use crate::domain::storage::Storage;
use crate::domain::subscription::SubscriptionId;
use crate::domain::DomainError;

/// Storage-backed implementation of ApiKeyRepository
///
/// Writes are serialized so a usage stamp read before a revoke can never
/// write the key back as active.
#[derive(Debug)]
pub struct StorageApiKeyRepository {
    storage: Arc<dyn Storage<ApiKey>>,
    writes: Mutex<()>,
}

impl StorageApiKeyRepository {
    pub fn new(storage: Arc<dyn Storage<ApiKey>>) -> Self {
        Self {
            storage,
            writes: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ApiKeyRepository for StorageApiKeyRepository {
    async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        self.storage.get(id).await
    }

    async fn get_by_prefix(&self, prefix: &str) -> Result<Option<ApiKey>, DomainError> {
        let all = self.storage.list().await?;
        Ok(all.into_iter().find(|k| k.key_prefix() == prefix))
    }

    async fn create(&self, api_key: ApiKey) -> Result<ApiKey, DomainError> {
        if self.get_by_prefix(api_key.key_prefix()).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "API key with prefix '{}' already exists",
                api_key.key_prefix()
            )));
        }

        self.storage.create(api_key).await
    }

    async fn update(&self, api_key: &ApiKey) -> Result<ApiKey, DomainError> {
        let _guard = self.writes.lock().await;
        self.storage.update(api_key.clone()).await
    }

    async fn list_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<ApiKey>, DomainError> {
        let mut keys: Vec<ApiKey> = self
            .storage
            .list()
            .await?
            .into_iter()
            .filter(|k| k.subscription_id() == subscription_id)
            .collect();

        keys.sort_by_key(|k| k.created_at());
        Ok(keys)
    }

    async fn record_usage(&self, id: &ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError> {
        let _guard = self.writes.lock().await;
        let mut key = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("API key '{}' not found", id)))?;

        key.record_usage(at);
        self.storage.update(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::InMemoryStorage;

    fn create_repo() -> StorageApiKeyRepository {
        StorageApiKeyRepository::new(Arc::new(InMemoryStorage::<ApiKey>::new()))
    }

    fn create_test_key(id: &str, subscription: &str) -> ApiKey {
        ApiKey::new(
            ApiKeyId::new(id).unwrap(),
            SubscriptionId::new(subscription).unwrap(),
            format!("Test Key {}", id),
            "sha256$hash",
            format!("veil_sk_{}", id),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = create_repo();

        repo.create(create_test_key("key-1", "sub-1")).await.unwrap();

        let fetched = repo.get(&ApiKeyId::new("key-1").unwrap()).await.unwrap();
        assert_eq!(fetched.unwrap().name(), "Test Key key-1");
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let repo = create_repo();
        let key = create_test_key("key-1", "sub-1");

        repo.create(key.clone()).await.unwrap();
        let result = repo.create(key).await;

        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_get_by_prefix() {
        let repo = create_repo();
        repo.create(create_test_key("key-1", "sub-1")).await.unwrap();

        let fetched = repo.get_by_prefix("veil_sk_key-1").await.unwrap();
        assert_eq!(fetched.unwrap().id().as_str(), "key-1");
        assert!(repo.get_by_prefix("veil_sk_nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_subscription() {
        let repo = create_repo();

        repo.create(create_test_key("key-1", "sub-1")).await.unwrap();
        repo.create(create_test_key("key-2", "sub-1")).await.unwrap();
        repo.create(create_test_key("key-3", "sub-2")).await.unwrap();

        let keys = repo
            .list_by_subscription(&SubscriptionId::new("sub-1").unwrap())
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = create_repo();

        let result = repo.update(&create_test_key("key-1", "sub-1")).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_record_usage() {
        let repo = create_repo();
        let key = create_test_key("key-1", "sub-1");
        repo.create(key.clone()).await.unwrap();

        let now = Utc::now();
        repo.record_usage(key.id(), now).await.unwrap();

        let fetched = repo.get(key.id()).await.unwrap().unwrap();
        assert_eq!(fetched.last_used_at(), Some(now));
    }
}
