//! Sources of model bundles, addressed by content identifier

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use modelchain_core::config::{BlobSourceConfig, RegistryConfig};

use crate::{RegistryError, RegistryResult};

/// Fetches a bundle's bytes by content identifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fails with [`RegistryError::BundleTooLarge`] once more than `limit` bytes arrive
    async fn fetch(&self, cid: &str, limit: u64) -> RegistryResult<Vec<u8>>;
}

/// Build the blob store the registry configuration names
pub fn blob_store_from_config(config: &RegistryConfig) -> RegistryResult<Arc<dyn BlobStore>> {
    Ok(match &config.blob {
        BlobSourceConfig::Directory { path } => Arc::new(DirectoryBlobStore::new(path.clone())),
        BlobSourceConfig::Ipfs { api_url } => {
            Arc::new(IpfsBlobStore::new(api_url, Duration::from_secs(config.fetch_timeout_secs))?)
        }
    })
}

fn too_large(cid: &str, size: u64, limit: u64) -> RegistryError {
    RegistryError::BundleTooLarge { cid: cid.to_string(), size, limit }
}

/// Bundles stored as files named by their cid
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
}

impl DirectoryBlobStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for DirectoryBlobStore {
    async fn fetch(&self, cid: &str, limit: u64) -> RegistryResult<Vec<u8>> {
        let path = self.root.join(cid);
        let fetch_error = |e: std::io::Error| RegistryError::BlobFetch { cid: cid.to_string(), reason: e.to_string() };

        debug!("Reading bundle {} from {}", cid, path.display());
        let size = tokio::fs::metadata(&path).await.map_err(fetch_error)?.len();
        if size > limit {
            return Err(too_large(cid, size, limit));
        }
        tokio::fs::read(&path).await.map_err(fetch_error)
    }
}

/// An IPFS node's HTTP API
#[derive(Debug, Clone)]
pub struct IpfsBlobStore {
    api_url: String,
    client: reqwest::Client,
}

impl IpfsBlobStore {
    /// A store whose requests give up after `timeout`
    pub fn new(api_url: &str, timeout: Duration) -> RegistryResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::BlobFetch { cid: String::new(), reason: format!("building HTTP client: {}", e) })?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl BlobStore for IpfsBlobStore {
    async fn fetch(&self, cid: &str, limit: u64) -> RegistryResult<Vec<u8>> {
        let url = format!("{}/api/v0/cat", self.api_url);
        let fetch_error = |reason: String| RegistryError::BlobFetch { cid: cid.to_string(), reason };

        debug!("Fetching bundle {} from {}", cid, url);
        let mut response = self
            .client
            .post(&url)
            .query(&[("arg", cid)])
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(fetch_error(format!("{} - {}", status, body)));
        }

        if let Some(size) = response.content_length().filter(|&size| size > limit) {
            return Err(too_large(cid, size, limit));
        }

        // the node may stream without a length, so count as chunks arrive
        let mut bundle = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e.to_string()))? {
            let size = (bundle.len() + chunk.len()) as u64;
            if size > limit {
                return Err(too_large(cid, size, limit));
            }
            bundle.extend_from_slice(&chunk);
        }
        Ok(bundle)
    }
}

/// In-memory bundles, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, cid: &str, bundle: Vec<u8>) {
        self.blobs.write().await.insert(cid.to_string(), bundle);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, cid: &str, limit: u64) -> RegistryResult<Vec<u8>> {
        let blobs = self.blobs.read().await;
        let bundle = blobs.get(cid).ok_or_else(|| RegistryError::BlobFetch {
            cid: cid.to_string(),
            reason: "not found".to_string(),
        })?;
        if bundle.len() as u64 > limit {
            return Err(too_large(cid, bundle.len() as u64, limit));
        }
        Ok(bundle.clone())
    }
}
