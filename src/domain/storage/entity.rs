//! Keys and entities persisted through [`Storage`](super::Storage)

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

/// A typed identifier that backends store as a plain string column
pub trait StorageKey: Clone + Debug + Send + Sync + Eq + std::hash::Hash {
    fn as_str(&self) -> &str;
}

/// An aggregate root stored as a JSON document under its key
pub trait StorageEntity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned {
    type Key: StorageKey;

    fn key(&self) -> &Self::Key;
}
