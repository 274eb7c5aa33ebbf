//! Object layer contract
//!
//! The storage engine lives outside this crate; the control plane only needs
//! the operations below. Until a layer is attached, handlers that need it
//! answer 403 with the initialisation error text.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("storage error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketInfo {
    pub name: String,
    pub created: DateTime<Utc>,
}

/// One disk known to the local erasure sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskHandle {
    pub id: String,
    pub path: String,
    pub local: bool,
    pub healthy: bool,
    pub total_space: u64,
    pub free_space: u64,
}

/// The subset of the storage engine the peer control plane talks to.
#[async_trait]
pub trait ObjectLayer: Send + Sync {
    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo, StoreError>;

    /// Reads a bucket configuration document, e.g. `lifecycle.xml`.
    async fn read_bucket_config(&self, bucket: &str, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Writes (`Some`) or removes (`None`) a bucket configuration document.
    async fn write_bucket_config(
        &self,
        bucket: &str,
        name: &str,
        data: Option<Vec<u8>>,
    ) -> Result<(), StoreError>;

    /// All disks of all pools and sets on this node.
    fn local_disks(&self) -> Vec<DiskHandle>;
}

/// In-memory object layer for tests and standalone development nodes.
#[derive(Default)]
pub struct MemoryObjectLayer {
    buckets: RwLock<HashMap<String, BucketState>>,
    disks: RwLock<Vec<DiskHandle>>,
}

#[derive(Default)]
struct BucketState {
    info: Option<BucketInfo>,
    configs: HashMap<String, Vec<u8>>,
}

impl MemoryObjectLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&self, name: &str) {
        let mut buckets = self.buckets.write().expect("bucket map poisoned");
        buckets.entry(name.to_string()).or_default().info = Some(BucketInfo {
            name: name.to_string(),
            created: Utc::now(),
        });
    }

    pub fn set_disks(&self, disks: Vec<DiskHandle>) {
        *self.disks.write().expect("disk list poisoned") = disks;
    }
}

#[async_trait]
impl ObjectLayer for MemoryObjectLayer {
    async fn get_bucket_info(&self, bucket: &str) -> Result<BucketInfo, StoreError> {
        let buckets = self.buckets.read().expect("bucket map poisoned");
        buckets
            .get(bucket)
            .and_then(|b| b.info.clone())
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))
    }

    async fn read_bucket_config(&self, bucket: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let buckets = self.buckets.read().expect("bucket map poisoned");
        let state = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::ConfigNotFound(format!("{}/{}", bucket, name)))
    }

    async fn write_bucket_config(
        &self,
        bucket: &str,
        name: &str,
        data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("bucket map poisoned");
        let state = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        match data {
            Some(data) => {
                state.configs.insert(name.to_string(), data);
            }
            None => {
                state.configs.remove(name);
            }
        }
        Ok(())
    }

    fn local_disks(&self) -> Vec<DiskHandle> {
        self.disks.read().expect("disk list poisoned").clone()
    }
}
