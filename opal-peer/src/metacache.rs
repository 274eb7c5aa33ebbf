//! Per-bucket listing cache registry
//!
//! Listings are cached per bucket under the root prefix that produced them.
//! Peers ask for the nearest usable cache (`find_cache`) or push updated
//! entry state (`update_cache_entry`); the stored entry is canonical and is
//! what gets returned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetacacheStatus {
    #[default]
    Started,
    Running,
    Success,
    Error,
}

/// One cached listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metacache {
    pub id: String,
    pub bucket: String,
    /// Prefix the listing walk started from.
    pub root: String,
    pub status: MetacacheStatus,
    #[serde(default)]
    pub file_not_found: bool,
    #[serde(default)]
    pub error: String,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_handout: Option<DateTime<Utc>>,
}

impl Metacache {
    fn usable(&self) -> bool {
        self.status != MetacacheStatus::Error && self.error.is_empty()
    }
}

/// Lookup options for `find_cache`. Uses the compact codec on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPathOptions {
    pub id: String,
    pub bucket: String,
    pub base_dir: String,
    /// Mint a new cache entry when nothing matches.
    pub create: bool,
}

/// All listing caches on this node, bucketed.
#[derive(Default)]
pub struct MetacacheManager {
    buckets: RwLock<HashMap<String, HashMap<String, Metacache>>>,
}

impl MetacacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache entry for `opts`: an exact id match first, then the
    /// usable entry with the longest root covering `base_dir`, else a fresh
    /// entry when `create` is set.
    pub async fn find_cache(&self, opts: &ListPathOptions) -> Option<Metacache> {
        {
            let buckets = self.buckets.read().await;
            if let Some(caches) = buckets.get(&opts.bucket) {
                if !opts.id.is_empty() {
                    if let Some(cache) = caches.get(&opts.id) {
                        return Some(cache.clone());
                    }
                }
                let best = caches
                    .values()
                    .filter(|c| c.usable() && opts.base_dir.starts_with(&c.root))
                    .max_by_key(|c| c.root.len());
                if let Some(cache) = best {
                    return Some(cache.clone());
                }
            }
        }

        if !opts.create {
            return None;
        }
        let cache = Metacache {
            id: if opts.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                opts.id.clone()
            },
            bucket: opts.bucket.clone(),
            root: opts.base_dir.clone(),
            status: MetacacheStatus::Started,
            started: Some(Utc::now()),
            last_update: Some(Utc::now()),
            last_handout: Some(Utc::now()),
            ..Default::default()
        };
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(opts.bucket.clone())
            .or_default()
            .insert(cache.id.clone(), cache.clone());
        Some(cache)
    }

    /// Upserts entry state pushed by a peer and returns the canonical stored
    /// entry. Completion fields only move forward.
    pub async fn update_cache_entry(&self, update: Metacache) -> Metacache {
        let mut buckets = self.buckets.write().await;
        let caches = buckets.entry(update.bucket.clone()).or_default();
        match caches.get_mut(&update.id) {
            Some(existing) => {
                if update.ended.is_some() && existing.ended.is_none() {
                    existing.ended = update.ended;
                }
                if update.last_update > existing.last_update {
                    existing.last_update = update.last_update;
                }
                // A finished walk never goes back to running.
                if existing.status != MetacacheStatus::Success
                    && existing.status != MetacacheStatus::Error
                {
                    existing.status = update.status;
                }
                if !update.error.is_empty() && existing.error.is_empty() {
                    existing.error = update.error;
                    existing.status = MetacacheStatus::Error;
                }
                existing.file_not_found |= update.file_not_found;
                existing.clone()
            }
            None => {
                caches.insert(update.id.clone(), update.clone());
                update
            }
        }
    }

    pub async fn delete_bucket_cache(&self, bucket: &str) {
        self.buckets.write().await.remove(bucket);
    }
}
