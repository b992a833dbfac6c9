//! API Key domain
//!
//! Keys authenticate callers and bind every request to a single
//! subscription. Secrets are stored hashed; identity survives regeneration.

mod entity;
mod repository;

pub use entity::{ApiKey, ApiKeyId, ApiKeyStatus};
pub use repository::ApiKeyRepository;
