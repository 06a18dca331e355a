//! Client for the distributed artifact cache.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use buildfleet_core::Build;

/// Cache client errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cache returned HTTP {0}")]
    Status(u16),
}

/// What the coordinator stores for a successful build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedArtifacts {
    pub artifacts: Vec<String>,
}

/// Cache entry as exchanged with the cache server.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    data: CachedArtifacts,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Artifact cache contract.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Look up a key. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<CachedArtifacts>, CacheError>;

    /// Store artifacts under a key.
    async fn put(
        &self,
        key: &str,
        data: &CachedArtifacts,
        metadata: HashMap<String, String>,
    ) -> Result<(), CacheError>;
}

/// Cache key of a build: SHA-256 over project, task and options (sorted).
pub fn cache_key(build: &Build) -> String {
    let mut hasher = Sha256::new();
    hasher.update(build.project.as_bytes());
    hasher.update([0u8]);
    hasher.update(build.task.as_bytes());
    let options: BTreeMap<&String, &String> = build.options.iter().collect();
    for (key, value) in options {
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// HTTP cache client: `GET|PUT {base_url}/cache/{key}`.
pub struct HttpCacheClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCacheClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/cache/{}", self.base_url, key)
    }
}

#[async_trait]
impl CacheClient for HttpCacheClient {
    async fn get(&self, key: &str) -> Result<Option<CachedArtifacts>, CacheError> {
        let url = self.url(key);
        debug!(url = %url, "Cache lookup");

        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entry: CacheEntry = response.json().await?;
                Ok(Some(entry.data))
            }
            status => Err(CacheError::Status(status.as_u16())),
        }
    }

    async fn put(
        &self,
        key: &str,
        data: &CachedArtifacts,
        metadata: HashMap<String, String>,
    ) -> Result<(), CacheError> {
        let url = self.url(key);
        debug!(url = %url, artifacts = data.artifacts.len(), "Cache store");

        let entry = CacheEntry {
            data: data.clone(),
            metadata,
        };
        let response = self.client.put(&url).json(&entry).send().await?;
        if !response.status().is_success() {
            return Err(CacheError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}
