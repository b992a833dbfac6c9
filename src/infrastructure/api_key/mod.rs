//! API Key infrastructure implementations
//!
//! Key generation and hashing, the storage-backed repository and the
//! service that ties them to subscriptions and the rate limiter.

mod generator;
mod repository;
mod service;

pub(crate) use generator::constant_time_compare;
pub use generator::{ApiKeyGenerator, GeneratedApiKey, SECRET_KEY_PREFIX};
pub use repository::StorageApiKeyRepository;
pub use service::{ApiKeyService, IssueApiKeyRequest, IssuedApiKey};
