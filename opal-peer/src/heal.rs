//! Background heal status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Snapshot returned by the heal-status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BgHealState {
    pub scanned_items_count: u64,
    pub last_heal_activity: Option<DateTime<Utc>>,
    /// Disks currently queued for healing.
    pub heal_disks: Vec<String>,
}

#[derive(Default)]
pub struct HealStatus {
    inner: RwLock<BgHealState>,
}

impl HealStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_scan(&self, items: u64) {
        let mut state = self.inner.write().await;
        state.scanned_items_count += items;
        state.last_heal_activity = Some(Utc::now());
    }

    pub async fn queue_disk(&self, endpoint: &str) {
        let mut state = self.inner.write().await;
        if !state.heal_disks.iter().any(|d| d == endpoint) {
            state.heal_disks.push(endpoint.to_string());
        }
    }

    pub async fn snapshot(&self) -> BgHealState {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_and_queue() {
        let status = HealStatus::new();
        status.record_scan(10).await;
        status.queue_disk("/disk1").await;
        status.queue_disk("/disk1").await;

        let snap = status.snapshot().await;
        assert_eq!(snap.scanned_items_count, 10);
        assert_eq!(snap.heal_disks, vec!["/disk1".to_string()]);
        assert!(snap.last_heal_activity.is_some());
    }
}
