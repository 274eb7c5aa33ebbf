//! Bucket lifecycle admin handlers
//!
//! `PUT/GET/DELETE /{bucket}?lifecycle`. The PUT body is XML and must carry
//! a matching Content-MD5; persisting goes through the bucket metadata
//! system, which also fans the change out to the other peers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};

use super::check_admin_auth;
use crate::bucketmeta::{load_bucket_metadata, LIFECYCLE_CONFIG_FILE};
use crate::error::{AdminError, AdminResult};
use crate::object::StoreError;
use crate::state::PeerServices;
use opal_core::lifecycle::LifecycleConfiguration;

fn require_lifecycle_query(params: &HashMap<String, String>) -> AdminResult<()> {
    if params.contains_key("lifecycle") {
        Ok(())
    } else {
        Err(AdminError::InvalidRequest(
            "unsupported bucket subresource".to_string(),
        ))
    }
}

async fn require_bucket(services: &PeerServices, bucket: &str) -> AdminResult<()> {
    let layer = services
        .object_layer()
        .map_err(|_| AdminError::ServerNotInitialized)?;
    match layer.get_bucket_info(bucket).await {
        Ok(_) => Ok(()),
        Err(StoreError::BucketNotFound(_)) => Err(AdminError::NoSuchBucket(bucket.to_string())),
        Err(e) => Err(AdminError::InternalError(e.to_string())),
    }
}

fn verify_content_md5(headers: &HeaderMap, body: &[u8]) -> AdminResult<()> {
    let declared = headers
        .get("content-md5")
        .and_then(|v| v.to_str().ok())
        .ok_or(AdminError::MissingContentMd5)?;
    let digest = BASE64.encode(Md5::digest(body));
    if digest != declared {
        return Err(AdminError::InvalidDigest);
    }
    Ok(())
}

/// Validates every transition storage class against the bucket's registered
/// remote targets.
async fn validate_lifecycle_transitions(
    services: &PeerServices,
    bucket: &str,
    config: &LifecycleConfiguration,
) -> AdminResult<()> {
    for class in config.transition_classes() {
        if !services.bucket_targets.resolves(bucket, class).await {
            return Err(AdminError::InvalidRequest(format!(
                "transition storage class {} is not registered for bucket {}",
                class, bucket
            )));
        }
    }
    Ok(())
}

pub async fn put_bucket_config(
    State(services): State<Arc<PeerServices>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> AdminResult<Response> {
    require_lifecycle_query(&params)?;
    check_admin_auth(
        &services,
        &headers,
        &Method::PUT,
        &format!("/{}", bucket),
    )?;
    verify_content_md5(&headers, &body)?;
    require_bucket(&services, &bucket).await?;

    // The reader is bounded to the declared Content-Length.
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(body.len());
    let document = &body[..declared.min(body.len())];

    let config = LifecycleConfiguration::parse(document)
        .map_err(|e| AdminError::MalformedXml(e.to_string()))?;
    config
        .validate()
        .map_err(|e| AdminError::MalformedXml(e.to_string()))?;
    validate_lifecycle_transitions(&services, &bucket, &config).await?;

    let layer = services
        .object_layer()
        .map_err(|_| AdminError::ServerNotInitialized)?;
    services
        .bucket_metadata
        .update(
            layer.as_ref(),
            &bucket,
            LIFECYCLE_CONFIG_FILE,
            Some(document.to_vec()),
        )
        .await
        .map_err(|e| AdminError::InternalError(e.to_string()))?;

    Ok(StatusCode::OK.into_response())
}

pub async fn get_bucket_config(
    State(services): State<Arc<PeerServices>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AdminResult<Response> {
    require_lifecycle_query(&params)?;
    check_admin_auth(
        &services,
        &headers,
        &Method::GET,
        &format!("/{}", bucket),
    )?;
    require_bucket(&services, &bucket).await?;

    let config = match services.bucket_metadata.lifecycle_config(&bucket).await {
        Some(config) => Some(config),
        None => {
            // Cold cache: fall back to the object layer.
            let layer = services
                .object_layer()
                .map_err(|_| AdminError::ServerNotInitialized)?;
            let meta = load_bucket_metadata(layer.as_ref(), &bucket)
                .await
                .map_err(|e| AdminError::InternalError(e.to_string()))?;
            services.bucket_metadata.set(&bucket, meta.clone()).await;
            meta.lifecycle
        }
    };
    let config =
        config.ok_or_else(|| AdminError::NoSuchLifecycleConfiguration(bucket.clone()))?;

    let xml = config
        .to_xml()
        .map_err(|e| AdminError::InternalError(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        xml,
    )
        .into_response())
}

pub async fn delete_bucket_config(
    State(services): State<Arc<PeerServices>>,
    Path(bucket): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> AdminResult<Response> {
    require_lifecycle_query(&params)?;
    check_admin_auth(
        &services,
        &headers,
        &Method::DELETE,
        &format!("/{}", bucket),
    )?;
    require_bucket(&services, &bucket).await?;

    let layer = services
        .object_layer()
        .map_err(|_| AdminError::ServerNotInitialized)?;
    services
        .bucket_metadata
        .update(layer.as_ref(), &bucket, LIFECYCLE_CONFIG_FILE, None)
        .await
        .map_err(|e| AdminError::InternalError(e.to_string()))?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
