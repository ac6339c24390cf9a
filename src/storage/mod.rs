//! Core storage layer
//!
//! Handles the fundamental storage operations including:
//! - Schema-less key-value access (get / set / multi-get)
//! - Durable persistence through a write-ahead log
//! - Per-owner secondary index lists

pub mod index;
mod memory;
mod persistence;

pub use index::{IndexKind, IndexManager, ReconcileReport};
pub use memory::MemoryStore;
pub use persistence::FileStore;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Unavailable(String),
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

/// Key-value backend contract.
///
/// No ordering, locking or atomicity is promised across keys; each key is
/// last-write-wins. `mget` returns one slot per requested key, with `None`
/// for absent keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Value>>, StoreError>;

    /// All entries whose key starts with `prefix`, sorted by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;
}
