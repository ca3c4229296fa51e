//! Key-value storage for ledger state
//!
//! The durable, replicated store is provided by the surrounding platform.
//! This module pins down the interface the contracts rely on: point reads
//! and writes, ordered range and prefix iteration, and atomic batches.

use async_trait::async_trait;

/// Storage-related errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A single mutation inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store `value` at `key`
    Put { key: String, value: Vec<u8> },
    /// Remove `key`
    Delete { key: String },
}

impl WriteOp {
    /// The key this operation touches
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// The core Storage trait defining the operations all storage implementations must support
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Store data at the specified key
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Retrieve data from the specified key; an absent key is `None`, not an error
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Delete data at the specified key
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// All entries whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// All entries in `[start, end)`, in key order. An empty `end` is unbounded.
    async fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Apply every operation or none of them
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> StorageResult<()>;
}

// Module exports
pub mod composite;
pub mod memory_storage;
pub mod sled_storage;

pub use composite::{create_composite_key, is_composite_key, split_composite_key};
pub use memory_storage::MemoryStorage;
pub use sled_storage::SledStorage;
