//! Storage-backed subscription repository

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::storage::Storage;
use crate::domain::subscription::{
    Subscription, SubscriptionChange, SubscriptionId, SubscriptionRepository, SubscriptionStatus,
};
use crate::domain::DomainError;

#[derive(Debug)]
pub struct StorageSubscriptionRepository {
    storage: Arc<dyn Storage<Subscription>>,
    writes: Mutex<()>,
}

impl StorageSubscriptionRepository {
    pub fn new(storage: Arc<dyn Storage<Subscription>>) -> Self {
        Self {
            storage,
            writes: Mutex::new(()),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for StorageSubscriptionRepository {
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>, DomainError> {
        self.storage.get(id).await
    }

    async fn create(&self, subscription: Subscription) -> Result<Subscription, DomainError> {
        self.storage.create(subscription).await
    }

    async fn update_with(
        &self,
        id: &SubscriptionId,
        change: SubscriptionChange,
    ) -> Result<Subscription, DomainError> {
        let _guard = self.writes.lock().await;
        let mut subscription = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("Subscription '{}' not found", id)))?;

        change(&mut subscription)?;
        self.storage.update(subscription).await
    }

    async fn list(
        &self,
        status: Option<SubscriptionStatus>,
    ) -> Result<Vec<Subscription>, DomainError> {
        let mut all: Vec<Subscription> = self
            .storage
            .list()
            .await?
            .into_iter()
            .filter(|s| status.is_none_or(|wanted| s.status() == wanted))
            .collect();

        all.sort_by_key(|s| s.created_at());
        Ok(all)
    }
}
