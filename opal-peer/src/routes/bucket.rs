//! Bucket metadata cache peer handlers

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;

use super::{encoded, require};
use crate::bucketmeta::{load_bucket_metadata as read_bucket_metadata, BucketStats};
use crate::error::PeerResult;
use crate::state::PeerServices;
use opal_core::event::RulesMap;
use opal_core::{Codec, CompactCodec, GeneralCodec};

/// Evicts every in-memory trace of a bucket: replication stats, the
/// metadata snapshot and the listing caches.
pub async fn delete_bucket_metadata(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    let bucket = require(&params, "bucket")?;
    services.replication_stats.delete(bucket).await;
    services.bucket_metadata.remove(bucket).await;
    services.metacache.delete_bucket_cache(bucket).await;
    Ok(StatusCode::OK)
}

/// Re-reads a bucket's metadata from the object layer and republishes the
/// derived state: notification rules into the listen registry, remote
/// targets into the target registry.
pub async fn load_bucket_metadata(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    let bucket = require(&params, "bucket")?;
    let layer = services.object_layer()?;
    let meta = read_bucket_metadata(layer.as_ref(), bucket).await?;

    if let Some(rules) = &meta.notification_rules {
        services.add_listen_rules(bucket, rules).await;
    }
    if !meta.targets.is_empty() {
        services
            .bucket_targets
            .set_all(bucket, meta.targets.clone())
            .await;
    }
    services.bucket_metadata.set(bucket, meta).await;
    Ok(StatusCode::OK)
}

/// Current replication stats of one bucket. Compact codec.
pub async fn get_bucket_stats(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<Response> {
    let bucket = require(&params, "bucket")?;
    let stats = BucketStats {
        replication_stats: services.replication_stats.get(bucket).await,
    };
    encoded(&CompactCodec, &stats)
}

/// Merges a pushed rules map into the listen registry.
pub async fn put_bucket_notification(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> PeerResult<StatusCode> {
    let bucket = require(&params, "bucket")?;
    let rules: RulesMap = GeneralCodec.decode(&body)?;
    services.add_listen_rules(bucket, &rules).await;
    Ok(StatusCode::OK)
}
