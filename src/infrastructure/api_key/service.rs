//! API Key service
//!
//! Issue, regenerate, revoke and resolve API keys. Keys are bound to a
//! subscription at issue time and never move.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::api_key::{ApiKey, ApiKeyId, ApiKeyRepository};
use crate::domain::rate_limit::{RateLimitConfig, MIN_REFILL_PER_SECOND};
use crate::domain::subscription::{SubscriptionId, SubscriptionRepository, SubscriptionStatus};
use crate::domain::DomainError;
use crate::infrastructure::rate_limit::RateLimiter;

use super::generator::ApiKeyGenerator;

/// Parameters for issuing a key
#[derive(Debug, Clone)]
pub struct IssueApiKeyRequest {
    pub subscription_id: SubscriptionId,
    pub name: String,
    pub rate_limits: Option<RateLimitConfig>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssueApiKeyRequest {
    pub fn new(subscription_id: SubscriptionId, name: impl Into<String>) -> Self {
        Self {
            subscription_id,
            name: name.into(),
            rate_limits: None,
            expires_at: None,
        }
    }
}

/// A key together with its plaintext secret
#[derive(Debug)]
pub struct IssuedApiKey {
    /// The API key entity (without the secret)
    pub api_key: ApiKey,
    /// The full secret key (only returned once)
    pub secret: String,
}

/// API Key service for managing API keys
#[derive(Debug, Clone)]
pub struct ApiKeyService {
    repository: Arc<dyn ApiKeyRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    generator: ApiKeyGenerator,
    rate_limiter: RateLimiter,
}

impl ApiKeyService {
    pub fn new(
        repository: Arc<dyn ApiKeyRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            repository,
            subscriptions,
            generator: ApiKeyGenerator::default(),
            rate_limiter,
        }
    }

    /// Create with a custom generator
    pub fn with_generator(mut self, generator: ApiKeyGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Issue a new key for an existing, non-cancelled subscription
    pub async fn issue(&self, request: IssueApiKeyRequest) -> Result<IssuedApiKey, DomainError> {
        let generated = self.generator.generate();
        self.store_new_key(request, generated.key, generated.hash, generated.prefix)
            .await
    }

    /// Issue a key with a known random part (for fixtures and integration tests)
    pub async fn issue_with_secret(
        &self,
        request: IssueApiKeyRequest,
        secret: &str,
    ) -> Result<IssuedApiKey, DomainError> {
        let generated = self.generator.from_secret(secret);
        self.store_new_key(request, generated.key, generated.hash, generated.prefix)
            .await
    }

    async fn store_new_key(
        &self,
        request: IssueApiKeyRequest,
        secret: String,
        hash: String,
        prefix: String,
    ) -> Result<IssuedApiKey, DomainError> {
        let subscription = self
            .subscriptions
            .get(&request.subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "Subscription '{}' not found",
                    request.subscription_id
                ))
            })?;

        if subscription.status() == SubscriptionStatus::Cancelled {
            return Err(DomainError::invalid_transition(format!(
                "Subscription '{}' is cancelled",
                subscription.id()
            )));
        }

        validate_rate_limits(request.rate_limits.as_ref())?;

        let id = ApiKeyId::generate();
        let mut api_key = ApiKey::new(
            id.clone(),
            request.subscription_id.clone(),
            request.name,
            hash,
            prefix,
        );

        if let Some(limits) = request.rate_limits {
            api_key = api_key.with_rate_limits(limits);
        }

        if let Some(expires_at) = request.expires_at {
            api_key = api_key.with_expiration(expires_at);
        }

        let created = self.repository.create(api_key).await?;

        info!(
            api_key_id = %id,
            subscription_id = %request.subscription_id,
            "API key issued"
        );

        Ok(IssuedApiKey {
            api_key: created,
            secret,
        })
    }

    /// Get an API key by ID
    pub async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, DomainError> {
        self.repository.get(id).await
    }

    pub async fn list_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<ApiKey>, DomainError> {
        self.repository.list_by_subscription(subscription_id).await
    }

    /// Find the key a presented secret belongs to
    ///
    /// Returns the key whenever the hash matches, even if it is revoked or
    /// expired; callers decide what an unusable key means for them.
    pub async fn resolve_secret(&self, secret: &str) -> Result<Option<ApiKey>, DomainError> {
        let Some(prefix) = self.generator.extract_prefix(secret) else {
            debug!("Presented API key has an unknown format");
            return Ok(None);
        };

        let Some(api_key) = self.repository.get_by_prefix(prefix).await? else {
            debug!(prefix = %prefix, "No API key with presented prefix");
            return Ok(None);
        };

        if !self.generator.verify_key(secret, api_key.secret_hash()) {
            debug!(api_key_id = %api_key.id(), "API key hash verification failed");
            return Ok(None);
        }

        Ok(Some(api_key))
    }

    /// Replace the secret of a key; its id and subscription stay the same
    pub async fn regenerate(&self, id: &ApiKeyId) -> Result<IssuedApiKey, DomainError> {
        let mut api_key = self.require(id).await?;
        let generated = self.generator.generate();

        api_key.rotate_secret(generated.hash, generated.prefix)?;
        let updated = self.repository.update(&api_key).await?;

        self.reset_bucket(&updated).await;
        info!(api_key_id = %id, "API key regenerated");

        Ok(IssuedApiKey {
            api_key: updated,
            secret: generated.key,
        })
    }

    /// Revoke a key; the next request using it is denied
    pub async fn revoke(&self, id: &ApiKeyId) -> Result<ApiKey, DomainError> {
        let mut api_key = self.require(id).await?;

        api_key.revoke();
        let updated = self.repository.update(&api_key).await?;

        self.reset_bucket(&updated).await;
        info!(api_key_id = %id, "API key revoked");

        Ok(updated)
    }

    /// Change the display name of a key
    pub async fn rename(&self, id: &ApiKeyId, name: &str) -> Result<ApiKey, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("API key name is required"));
        }

        let mut api_key = self.require(id).await?;

        api_key.set_name(name);
        let updated = self.repository.update(&api_key).await?;

        info!(api_key_id = %id, "API key renamed");
        Ok(updated)
    }

    /// Update rate limits for an API key
    pub async fn update_rate_limits(
        &self,
        id: &ApiKeyId,
        rate_limits: Option<RateLimitConfig>,
    ) -> Result<ApiKey, DomainError> {
        validate_rate_limits(rate_limits.as_ref())?;
        let mut api_key = self.require(id).await?;

        api_key.set_rate_limits(rate_limits);
        let updated = self.repository.update(&api_key).await?;

        self.reset_bucket(&updated).await;
        Ok(updated)
    }

    /// Stamp the key's last-used time
    pub async fn record_usage(&self, id: &ApiKeyId, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.repository.record_usage(id, at).await
    }

    async fn require(&self, id: &ApiKeyId) -> Result<ApiKey, DomainError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("API key '{}' not found", id)))
    }

    async fn reset_bucket(&self, api_key: &ApiKey) {
        if let Err(e) = self.rate_limiter.reset(api_key).await {
            warn!(api_key_id = %api_key.id(), error = %e, "Failed to reset rate limit bucket");
        }
    }
}

fn validate_rate_limits(limits: Option<&RateLimitConfig>) -> Result<(), DomainError> {
    match limits {
        Some(limits) if limits.enabled && !limits.is_valid() => {
            Err(DomainError::validation(format!(
                "Rate limit capacity must be positive and refill rate at least {}/s",
                MIN_REFILL_PER_SECOND
            )))
        }
        _ => Ok(()),
    }
}
