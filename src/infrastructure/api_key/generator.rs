//! API Key generation
//!
//! Secrets are `veil_sk_` followed by URL-safe base64 of random bytes. Only a
//! SHA-256 hash and a short lookup prefix are ever stored.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Type prefix carried by every secret key
pub const SECRET_KEY_PREFIX: &str = "veil_sk_";

/// Random characters appended to the type prefix to form the lookup prefix
const LOOKUP_CHARS: usize = 8;

/// Result of generating a new API key
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    /// The full secret (only shown once, at issue or regeneration)
    pub key: String,
    /// The key prefix for lookup
    pub prefix: String,
    /// The hashed key for storage
    pub hash: String,
}

/// Generator for secure API keys
#[derive(Debug, Clone)]
pub struct ApiKeyGenerator {
    prefix: String,
    key_bytes: usize,
}

impl ApiKeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            key_bytes: 32,
        }
    }

    /// Set the number of random bytes
    pub fn with_key_bytes(mut self, bytes: usize) -> Self {
        self.key_bytes = bytes;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a new API key
    pub fn generate(&self) -> GeneratedApiKey {
        let mut random_bytes = vec![0u8; self.key_bytes];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        self.from_secret(&URL_SAFE_NO_PAD.encode(&random_bytes))
    }

    /// Build a key from a known random part; deterministic, for fixtures
    pub fn from_secret(&self, secret: &str) -> GeneratedApiKey {
        let key = format!("{}{}", self.prefix, secret);
        let lookup: String = secret.chars().take(LOOKUP_CHARS).collect();

        GeneratedApiKey {
            prefix: format!("{}{}", self.prefix, lookup),
            hash: self.hash_key(&key),
            key,
        }
    }

    /// Hash an API key for storage
    pub fn hash_key(&self, key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("sha256${}", URL_SAFE_NO_PAD.encode(digest))
    }

    /// Verify a presented key against a stored hash in constant time
    pub fn verify_key(&self, key: &str, stored_hash: &str) -> bool {
        constant_time_compare(&self.hash_key(key), stored_hash)
    }

    /// Lookup prefix of a presented key, if it carries this generator's prefix
    pub fn extract_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        let random = key.strip_prefix(self.prefix.as_str())?;

        if random.is_empty() {
            return None;
        }

        let lookup_len = random
            .char_indices()
            .nth(LOOKUP_CHARS)
            .map_or(random.len(), |(idx, _)| idx);

        Some(&key[..self.prefix.len() + lookup_len])
    }
}

impl Default for ApiKeyGenerator {
    fn default() -> Self {
        Self::new(SECRET_KEY_PREFIX)
    }
}

pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key() {
        let generator = ApiKeyGenerator::default();
        let generated = generator.generate();

        assert!(generated.key.starts_with("veil_sk_"));
        assert_eq!(generated.prefix.len(), "veil_sk_".len() + 8);
        assert!(generated.key.starts_with(&generated.prefix));
        assert!(generated.hash.starts_with("sha256$"));
    }

    #[test]
    fn test_key_uniqueness() {
        let generator = ApiKeyGenerator::default();
        let key1 = generator.generate();
        let key2 = generator.generate();

        assert_ne!(key1.key, key2.key);
        assert_ne!(key1.hash, key2.hash);
    }

    #[test]
    fn test_verify_key() {
        let generator = ApiKeyGenerator::default();
        let generated = generator.generate();

        assert!(generator.verify_key(&generated.key, &generated.hash));
        assert!(!generator.verify_key("veil_sk_wrong", &generated.hash));
    }

    #[test]
    fn test_from_secret_is_deterministic() {
        let generator = ApiKeyGenerator::default();
        let a = generator.from_secret("abcdefgh12345");
        let b = generator.from_secret("abcdefgh12345");

        assert_eq!(a.key, "veil_sk_abcdefgh12345");
        assert_eq!(a.prefix, "veil_sk_abcdefgh");
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_extract_prefix() {
        let generator = ApiKeyGenerator::default();

        assert_eq!(
            generator.extract_prefix("veil_sk_abc12345xyz"),
            Some("veil_sk_abc12345")
        );
        assert_eq!(generator.extract_prefix("veil_sk_abc"), Some("veil_sk_abc"));
        assert_eq!(generator.extract_prefix("veil_sk_"), None);
        assert_eq!(generator.extract_prefix("pk_live_abc12345"), None);
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }
}
