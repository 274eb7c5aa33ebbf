//! Per-bucket bandwidth monitoring

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Exponential moving average weight for new throughput samples.
const EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthDetails {
    /// Configured limit, bytes per second. Zero means unlimited.
    pub limit_bytes_per_sec: u64,
    /// Smoothed measured throughput, bytes per second.
    pub current_bandwidth_bytes_per_sec: f64,
}

/// Reply shape of `GetBandwidth`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub bucket_stats: HashMap<String, BandwidthDetails>,
}

/// Tracks replication throughput per bucket.
#[derive(Default)]
pub struct BucketMonitor {
    inner: RwLock<HashMap<String, BandwidthDetails>>,
}

impl BucketMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, bucket: &str, limit_bytes_per_sec: u64) {
        let mut inner = self.inner.write().await;
        inner
            .entry(bucket.to_string())
            .or_default()
            .limit_bytes_per_sec = limit_bytes_per_sec;
    }

    pub async fn untrack(&self, bucket: &str) {
        self.inner.write().await.remove(bucket);
    }

    /// Folds one transfer sample into the bucket's moving average.
    pub async fn record(&self, bucket: &str, bytes: u64, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let sample = bytes as f64 / elapsed.as_secs_f64();
        let mut inner = self.inner.write().await;
        let details = inner.entry(bucket.to_string()).or_default();
        details.current_bandwidth_bytes_per_sec = if details.current_bandwidth_bytes_per_sec == 0.0
        {
            sample
        } else {
            EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * details.current_bandwidth_bytes_per_sec
        };
    }

    /// Report for the selected buckets; an empty selection means all.
    pub async fn get_report(&self, buckets: &[String]) -> BandwidthReport {
        let selection: HashSet<&str> = buckets
            .iter()
            .map(String::as_str)
            .filter(|b| !b.is_empty())
            .collect();
        let inner = self.inner.read().await;
        let bucket_stats = inner
            .iter()
            .filter(|(bucket, _)| selection.is_empty() || selection.contains(bucket.as_str()))
            .map(|(bucket, details)| (bucket.clone(), details.clone()))
            .collect();
        BandwidthReport { bucket_stats }
    }
}
