//! Local lock-map snapshots

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One holder of a resource lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    pub owner: String,
    pub writer: bool,
    pub acquired: DateTime<Utc>,
}

/// The node-local lock map. `GetLocks` returns a point-in-time copy.
#[derive(Default)]
pub struct LockRegistry {
    inner: RwLock<HashMap<String, Vec<LockInfo>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, resource: &str, info: LockInfo) {
        self.inner
            .write()
            .await
            .entry(resource.to_string())
            .or_default()
            .push(info);
    }

    pub async fn release(&self, resource: &str, id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(holders) = inner.get_mut(resource) {
            holders.retain(|l| l.id != id);
            if holders.is_empty() {
                inner.remove(resource);
            }
        }
    }

    pub async fn snapshot(&self) -> HashMap<String, Vec<LockInfo>> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_snapshot_release() {
        let registry = LockRegistry::new();
        registry
            .register(
                "bucket/object",
                LockInfo {
                    id: "l1".to_string(),
                    owner: "node-2".to_string(),
                    writer: true,
                    acquired: Utc::now(),
                },
            )
            .await;

        let snap = registry.snapshot().await;
        assert_eq!(snap["bucket/object"].len(), 1);

        registry.release("bucket/object", "l1").await;
        assert!(registry.snapshot().await.is_empty());
    }
}
