//! API Key entity and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rate_limit::RateLimitConfig;
use crate::domain::storage::{StorageEntity, StorageKey};
use crate::domain::subscription::SubscriptionId;
use crate::domain::validation::{validate_id, IdValidationError};
use crate::domain::DomainError;

/// API Key identifier - stable across secret regeneration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ApiKeyId(String);

impl ApiKeyId {
    /// Create a new ApiKeyId after validation
    pub fn new(id: impl Into<String>) -> Result<Self, IdValidationError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    /// Fresh identifier of the form `key-<uuid>`
    pub fn generate() -> Self {
        Self(format!("key-{}", uuid::Uuid::new_v4()))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ApiKeyId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApiKeyId> for String {
    fn from(id: ApiKeyId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for ApiKeyId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl StorageEntity for ApiKey {
    type Key = ApiKeyId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

/// Status of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    /// Key is active and can be used
    #[default]
    Active,
    /// Key has been revoked; terminal
    Revoked,
}

/// API Key entity
///
/// A key belongs to exactly one subscription for its whole life. Only the
/// hash of the secret is kept; the plaintext is shown once at issue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    id: ApiKeyId,
    subscription_id: SubscriptionId,
    name: String,
    /// Format: `sha256$<base64>`, never exposed through the API
    secret_hash: String,
    /// Lookup prefix: type prefix plus the first 8 random characters
    key_prefix: String,
    status: ApiKeyStatus,
    /// Per-key override of the default bucket parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    rate_limits: Option<RateLimitConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Create a new API key
    pub fn new(
        id: ApiKeyId,
        subscription_id: SubscriptionId,
        name: impl Into<String>,
        secret_hash: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            subscription_id,
            name: name.into(),
            secret_hash: secret_hash.into(),
            key_prefix: key_prefix.into(),
            status: ApiKeyStatus::Active,
            rate_limits: None,
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
            revoked_at: None,
        }
    }

    /// Set rate limits
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = Some(rate_limits);
        self
    }

    /// Set expiration
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    // Getters

    pub fn id(&self) -> &ApiKeyId {
        &self.id
    }

    pub fn subscription_id(&self) -> &SubscriptionId {
        &self.subscription_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret_hash(&self) -> &str {
        &self.secret_hash
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn status(&self) -> ApiKeyStatus {
        self.status
    }

    pub fn rate_limits(&self) -> Option<&RateLimitConfig> {
        self.rate_limits.as_ref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.last_used_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn revoked_at(&self) -> Option<DateTime<Utc>> {
        self.revoked_at
    }

    // Status checks

    /// Check if the key is currently valid and usable
    pub fn is_valid(&self) -> bool {
        self.status == ApiKeyStatus::Active && !self.is_expired()
    }

    /// Check if the key has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Utc::now() >= expires_at)
    }

    pub fn is_revoked(&self) -> bool {
        self.status == ApiKeyStatus::Revoked
    }

    // Mutators

    /// Replace the secret in place; the old secret stops matching immediately
    pub fn rotate_secret(
        &mut self,
        secret_hash: impl Into<String>,
        key_prefix: impl Into<String>,
    ) -> Result<(), DomainError> {
        if self.is_revoked() {
            return Err(DomainError::invalid_transition(format!(
                "API key '{}' is revoked and cannot be regenerated",
                self.id
            )));
        }

        self.secret_hash = secret_hash.into();
        self.key_prefix = key_prefix.into();
        self.touch();
        Ok(())
    }

    /// Revoke the key; repeated calls keep the first revocation time
    pub fn revoke(&mut self) {
        if self.is_revoked() {
            return;
        }

        let now = Utc::now();
        self.status = ApiKeyStatus::Revoked;
        self.revoked_at = Some(now);
        self.updated_at = now;
    }

    /// Update the display name
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Update rate limits
    pub fn set_rate_limits(&mut self, rate_limits: Option<RateLimitConfig>) {
        self.rate_limits = rate_limits;
        self.touch();
    }

    /// Record key usage
    pub fn record_usage(&mut self, at: DateTime<Utc>) {
        if self.last_used_at.is_none_or(|last| last < at) {
            self.last_used_at = Some(at);
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
