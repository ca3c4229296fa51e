//! Sled-backed storage
//!
//! Durable local storage for the command-line host. Sled keeps keys in
//! byte order, which matches the string order the range queries expect.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tracing::debug;

use super::{Storage, StorageError, StorageResult, WriteOp};

/// Storage on top of an embedded sled database
#[derive(Clone)]
pub struct SledStorage {
    db: sled::Db,
    path: PathBuf,
}

impl SledStorage {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        debug!("Opened sled storage at {}", path.display());
        Ok(Self { db, path })
    }

    /// Location of the database on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn decode_entry(entry: sled::Result<(sled::IVec, sled::IVec)>) -> StorageResult<(String, Vec<u8>)> {
        let (key, value) = entry?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|e| StorageError::InvalidKey(format!("non UTF-8 key in database: {}", e)))?;
        Ok((key, value.to_vec()))
    }
}

#[async_trait]
impl Storage for SledStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.db.insert(key.as_bytes(), data)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.db.remove(key.as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        self.db
            .scan_prefix(prefix.as_bytes())
            .map(Self::decode_entry)
            .collect()
    }

    async fn range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        if end.is_empty() {
            self.db.range(start.as_bytes()..).map(Self::decode_entry).collect()
        } else if start >= end {
            Ok(Vec::new())
        } else {
            self.db
                .range(start.as_bytes()..end.as_bytes())
                .map(Self::decode_entry)
                .collect()
        }
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> StorageResult<()> {
        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                WriteOp::Put { key, value } => batch.insert(key.as_bytes(), value),
                WriteOp::Delete { key } => batch.remove(key.as_bytes()),
            }
        }
        self.db.apply_batch(batch)?;
        self.db.flush_async().await?;
        Ok(())
    }
}
