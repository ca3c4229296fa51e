use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageResult, WriteOp};

/// In-memory storage implementation, ordered so range queries work
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    /// In-memory data store
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new memory storage with initial data
    pub fn with_data(data: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store holds no keys
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let store = self.data.read().await;
        Ok(store.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let store = self.data.read().await;
        let entries = store
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(entries)
    }

    async fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        if !end.is_empty() && start >= end {
            return Ok(Vec::new());
        }
        let upper = if end.is_empty() { Bound::Unbounded } else { Bound::Excluded(end) };

        let store = self.data.read().await;
        let entries = store
            .range::<str, _>((Bound::Included(start), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(entries)
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> StorageResult<()> {
        // a single write guard makes the batch atomic for readers
        let mut store = self.data.write().await;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    store.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    store.remove(&key);
                }
            }
        }
        Ok(())
    }
}
