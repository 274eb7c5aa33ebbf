//! Metacache peer handlers. Both endpoints speak the compact codec.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;

use super::encoded;
use crate::error::PeerResult;
use crate::metacache::{ListPathOptions, Metacache};
use crate::state::PeerServices;
use opal_core::{Codec, CompactCodec};

/// Nearest cache entry for the given listing options.
pub async fn get_metacache_listing(
    State(services): State<Arc<PeerServices>>,
    body: Bytes,
) -> PeerResult<Response> {
    let opts: ListPathOptions = if body.is_empty() {
        ListPathOptions::default()
    } else {
        CompactCodec.decode(&body)?
    };
    let result = services.metacache.find_cache(&opts).await;
    encoded(&CompactCodec, &result)
}

/// Upserts pushed entry state and returns the canonical stored entry.
pub async fn update_metacache_listing(
    State(services): State<Arc<PeerServices>>,
    body: Bytes,
) -> PeerResult<Response> {
    let update: Metacache = CompactCodec.decode(&body)?;
    let canonical = services.metacache.update_cache_entry(update).await;
    encoded(&CompactCodec, &canonical)
}
