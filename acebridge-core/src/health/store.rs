//! Link catalog access for health sweeps.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{HealthCheckError, LinkCheckResult};

/// A checkable link: content hash plus a human-readable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub hash: String,
    #[serde(default)]
    pub label: String,
}

/// A link together with its last recorded check, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkReport {
    #[serde(flatten)]
    pub link: LinkRef,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub result: Option<LinkCheckResult>,
}

/// Source of links to check and sink for their results.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Links to sweep, in order.
    ///
    /// # Errors
    /// - `HealthCheckError::Store` - Catalog could not be read
    async fn links(&self) -> Result<Vec<LinkRef>, HealthCheckError>;

    /// Records the outcome of checking `hash`.
    ///
    /// # Errors
    /// - `HealthCheckError::Store` - Result could not be persisted
    async fn record(&self, hash: &str, result: &LinkCheckResult) -> Result<(), HealthCheckError>;
}

/// Fixed link list with results held in memory.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: Vec<LinkRef>,
    results: RwLock<HashMap<String, LinkCheckResult>>,
}

impl MemoryLinkStore {
    pub fn new(links: Vec<LinkRef>) -> Self {
        Self {
            links,
            results: RwLock::new(HashMap::new()),
        }
    }

    /// Loads links from a JSON array of `{"hash": ..., "label": ...}`.
    ///
    /// # Errors
    /// - `HealthCheckError::LinkFile` - File could not be read
    /// - `HealthCheckError::LinkFileFormat` - File is not a link array
    pub async fn load(path: &Path) -> Result<Self, HealthCheckError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|source| HealthCheckError::LinkFile {
                path: path.to_path_buf(),
                source,
            })?;
        let links: Vec<LinkRef> =
            serde_json::from_slice(&raw).map_err(|source| HealthCheckError::LinkFileFormat {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(links))
    }

    pub fn result(&self, hash: &str) -> Option<LinkCheckResult> {
        self.results.read().get(hash).cloned()
    }

    /// All links in catalog order with their latest results.
    pub fn reports(&self) -> Vec<LinkReport> {
        let results = self.results.read();
        self.links
            .iter()
            .map(|link| LinkReport {
                link: link.clone(),
                result: results.get(&link.hash).cloned(),
            })
            .collect()
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn links(&self) -> Result<Vec<LinkRef>, HealthCheckError> {
        Ok(self.links.clone())
    }

    async fn record(&self, hash: &str, result: &LinkCheckResult) -> Result<(), HealthCheckError> {
        self.results.write().insert(hash.to_string(), result.clone());
        Ok(())
    }
}
