//! Bucket metadata, replication stats and remote-target registries
//!
//! Each registry is owned by a single manager. Handlers hold short critical
//! sections and publish whole snapshots; cross-peer coherence comes from the
//! coordinator calling every node's load/delete endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::object::{ObjectLayer, StoreError};
use opal_core::lifecycle::LifecycleConfiguration;
use opal_core::RulesMap;

/// Bucket configuration document names.
pub const LIFECYCLE_CONFIG_FILE: &str = "lifecycle.xml";
pub const NOTIFICATION_CONFIG_FILE: &str = "notification.json";
pub const TARGETS_CONFIG_FILE: &str = "targets.json";

/// One remote replication/transition target of a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketTarget {
    pub arn: String,
    pub endpoint: String,
    /// Storage class name lifecycle transitions resolve against.
    pub storage_class: String,
}

/// Point-in-time metadata snapshot of one bucket.
#[derive(Debug, Clone, Default)]
pub struct BucketMetadata {
    pub name: String,
    pub lifecycle: Option<LifecycleConfiguration>,
    pub notification_rules: Option<RulesMap>,
    pub targets: Vec<BucketTarget>,
}

/// Reads a bucket's metadata from the object layer.
pub async fn load_bucket_metadata(
    layer: &dyn ObjectLayer,
    bucket: &str,
) -> Result<BucketMetadata, StoreError> {
    layer.get_bucket_info(bucket).await?;

    let mut meta = BucketMetadata {
        name: bucket.to_string(),
        ..Default::default()
    };

    match layer.read_bucket_config(bucket, LIFECYCLE_CONFIG_FILE).await {
        Ok(data) => {
            meta.lifecycle = Some(
                LifecycleConfiguration::parse(&data)
                    .map_err(|e| StoreError::Io(e.to_string()))?,
            );
        }
        Err(StoreError::ConfigNotFound(_)) => {}
        Err(e) => return Err(e),
    }

    match layer
        .read_bucket_config(bucket, NOTIFICATION_CONFIG_FILE)
        .await
    {
        Ok(data) => {
            meta.notification_rules =
                Some(serde_json::from_slice(&data).map_err(|e| StoreError::Io(e.to_string()))?);
        }
        Err(StoreError::ConfigNotFound(_)) => {}
        Err(e) => return Err(e),
    }

    match layer.read_bucket_config(bucket, TARGETS_CONFIG_FILE).await {
        Ok(data) => {
            meta.targets =
                serde_json::from_slice(&data).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        Err(StoreError::ConfigNotFound(_)) => {}
        Err(e) => return Err(e),
    }

    Ok(meta)
}

/// Contract used to tell the rest of the cluster about a metadata change.
/// The cluster-wide notification system is an external collaborator; the
/// default implementation does nothing.
#[async_trait]
pub trait PeerNotifier: Send + Sync {
    async fn load_bucket_metadata(&self, bucket: &str);
}

pub struct NoopNotifier;

#[async_trait]
impl PeerNotifier for NoopNotifier {
    async fn load_bucket_metadata(&self, _bucket: &str) {}
}

/// Process-wide bucket metadata cache.
pub struct BucketMetadataSys {
    metadata: RwLock<HashMap<String, Arc<BucketMetadata>>>,
    notifier: Arc<dyn PeerNotifier>,
}

impl BucketMetadataSys {
    pub fn new(notifier: Arc<dyn PeerNotifier>) -> Self {
        Self {
            metadata: RwLock::new(HashMap::new()),
            notifier,
        }
    }

    pub async fn get(&self, bucket: &str) -> Option<Arc<BucketMetadata>> {
        self.metadata.read().await.get(bucket).cloned()
    }

    pub async fn set(&self, bucket: &str, meta: BucketMetadata) {
        self.metadata
            .write()
            .await
            .insert(bucket.to_string(), Arc::new(meta));
    }

    pub async fn remove(&self, bucket: &str) {
        self.metadata.write().await.remove(bucket);
    }

    pub async fn lifecycle_config(&self, bucket: &str) -> Option<LifecycleConfiguration> {
        self.get(bucket).await.and_then(|m| m.lifecycle.clone())
    }

    /// Persists one configuration document, refreshes the local snapshot and
    /// asks the notifier to fan the change out to the other peers.
    pub async fn update(
        &self,
        layer: &dyn ObjectLayer,
        bucket: &str,
        config_file: &str,
        data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        layer.write_bucket_config(bucket, config_file, data).await?;
        let meta = load_bucket_metadata(layer, bucket).await?;
        self.set(bucket, meta).await;
        self.notifier.load_bucket_metadata(bucket).await;
        Ok(())
    }
}

/// Replication counters of one bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub pending_size: u64,
    pub replicated_size: u64,
    pub failed_size: u64,
    pub pending_count: u64,
    pub failed_count: u64,
}

/// Wire shape of `GetBucketStats`. Uses the compact codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub replication_stats: ReplicationStats,
}

#[derive(Default)]
pub struct ReplicationStatsMap {
    inner: RwLock<HashMap<String, ReplicationStats>>,
}

impl ReplicationStatsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, bucket: &str) -> ReplicationStats {
        self.inner
            .read()
            .await
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set(&self, bucket: &str, stats: ReplicationStats) {
        self.inner.write().await.insert(bucket.to_string(), stats);
    }

    pub async fn delete(&self, bucket: &str) {
        self.inner.write().await.remove(bucket);
    }
}

/// Remote targets registered per bucket.
#[derive(Default)]
pub struct BucketTargetSys {
    targets: RwLock<HashMap<String, Vec<BucketTarget>>>,
}

impl BucketTargetSys {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_all(&self, bucket: &str, targets: Vec<BucketTarget>) {
        self.targets
            .write()
            .await
            .insert(bucket.to_string(), targets);
    }

    pub async fn remove(&self, bucket: &str) {
        self.targets.write().await.remove(bucket);
    }

    pub async fn list(&self, bucket: &str) -> Vec<BucketTarget> {
        self.targets
            .read()
            .await
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a lifecycle transition storage class resolves to a registered
    /// target of this bucket.
    pub async fn resolves(&self, bucket: &str, storage_class: &str) -> bool {
        self.targets
            .read()
            .await
            .get(bucket)
            .map(|targets| {
                targets
                    .iter()
                    .any(|t| t.arn == storage_class || t.storage_class == storage_class)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::MemoryObjectLayer;

    #[tokio::test]
    async fn update_persists_and_refreshes_snapshot() {
        let layer = MemoryObjectLayer::new();
        layer.add_bucket("photos");
        let sys = BucketMetadataSys::new(Arc::new(NoopNotifier));

        let xml = b"<LifecycleConfiguration><Rule><ID>r</ID><Status>Enabled</Status>\
                    <Expiration><Days>7</Days></Expiration></Rule></LifecycleConfiguration>";
        sys.update(&layer, "photos", LIFECYCLE_CONFIG_FILE, Some(xml.to_vec()))
            .await
            .unwrap();

        let config = sys.lifecycle_config("photos").await.unwrap();
        assert_eq!(config.rules.len(), 1);

        sys.update(&layer, "photos", LIFECYCLE_CONFIG_FILE, None)
            .await
            .unwrap();
        assert!(sys.lifecycle_config("photos").await.is_none());
    }

    #[tokio::test]
    async fn target_resolution() {
        let sys = BucketTargetSys::new();
        sys.set_all(
            "photos",
            vec![BucketTarget {
                arn: "arn:opal:ilm:us-east-1:cold".to_string(),
                endpoint: "https://cold.example.com".to_string(),
                storage_class: "COLD".to_string(),
            }],
        )
        .await;

        assert!(sys.resolves("photos", "COLD").await);
        assert!(sys.resolves("photos", "arn:opal:ilm:us-east-1:cold").await);
        assert!(!sys.resolves("photos", "GLACIER_X").await);
        assert!(!sys.resolves("other", "COLD").await);
    }

    #[tokio::test]
    async fn replication_stats_default_when_absent() {
        let stats = ReplicationStatsMap::new();
        assert_eq!(stats.get("ghost").await, ReplicationStats::default());
    }
}
