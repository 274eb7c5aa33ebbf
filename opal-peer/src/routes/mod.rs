//! Peer RPC route table
//!
//! Every method lives under `/opal/peer/v1`, is POST-only and passes
//! envelope validation before its handler runs. Failures on this surface
//! are 403 with the literal reason as a plain-text body.

pub mod bucket;
pub mod iam;
pub mod info;
pub mod metacache;
pub mod service;
pub mod streams;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use chrono::Utc;

use crate::auth::validate_peer_request;
use crate::error::{PeerError, PeerResult};
use crate::state::PeerServices;
use opal_core::trace::{TraceCallStats, TraceEntry, TraceKind, TraceRequestInfo, TraceResponseInfo};
use opal_core::Codec;

pub const PEER_PREFIX: &str = "/opal/peer";
pub const PEER_VERSION: &str = "v1";

/// Builds the peer RPC router.
pub fn peer_router(services: Arc<PeerServices>) -> Router {
    let rpc = Router::new()
        .route("/health", post(service::health))
        .route("/locks", post(service::get_locks))
        .route("/serverinfo", post(info::server_info))
        .route("/procinfo", post(info::proc_info))
        .route("/meminfo", post(info::mem_info))
        .route("/osinfo", post(info::os_info))
        .route("/diskhwinfo", post(info::disk_hw_info))
        .route("/cpuinfo", post(info::cpu_info))
        .route("/driveinfo", post(info::drive_info))
        .route("/netinfo", post(info::net_info))
        .route("/dispatchnetinfo", post(info::dispatch_net_info))
        .route("/cyclebloom", post(service::cycle_bloom))
        .route("/deletebucketmetadata", post(bucket::delete_bucket_metadata))
        .route("/loadbucketmetadata", post(bucket::load_bucket_metadata))
        .route("/getbucketstats", post(bucket::get_bucket_stats))
        .route("/signalservice", post(service::signal_service))
        .route("/serverupdate", post(service::server_update))
        .route("/deletepolicy", post(iam::delete_policy))
        .route("/loadpolicy", post(iam::load_policy))
        .route("/loadpolicymapping", post(iam::load_policy_mapping))
        .route("/deleteuser", post(iam::delete_user))
        .route("/deleteserviceaccount", post(iam::delete_service_account))
        .route("/loaduser", post(iam::load_user))
        .route("/loadserviceaccount", post(iam::load_service_account))
        .route("/loadgroup", post(iam::load_group))
        .route("/startprofiling", post(service::start_profiling))
        .route(
            "/downloadprofilingdata",
            post(service::download_profiling_data),
        )
        .route("/trace", post(streams::trace_stream))
        .route("/listen", post(streams::listen))
        .route(
            "/backgroundhealstatus",
            post(service::background_heal_status),
        )
        .route("/log", post(streams::console_log))
        .route("/getlocaldiskids", post(service::get_local_disk_ids))
        .route("/getbandwidth", post(streams::get_bandwidth))
        .route("/getmetacachelisting", post(metacache::get_metacache_listing))
        .route(
            "/updatemetacachelisting",
            post(metacache::update_metacache_listing),
        )
        .route("/getpeermetrics", post(streams::get_peer_metrics))
        .route("/putbucketnotification", post(bucket::put_bucket_notification))
        .with_state(services.clone());

    Router::new()
        .nest(&format!("{}/{}", PEER_PREFIX, PEER_VERSION), rpc)
        .layer(middleware::from_fn_with_state(
            services.clone(),
            trace_peer_call,
        ))
        .layer(middleware::from_fn_with_state(services, validate_envelope))
}

/// Envelope validation in front of every peer method. Handlers behind this
/// middleware never see an unauthenticated request.
async fn validate_envelope(
    State(services): State<Arc<PeerServices>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    match validate_peer_request(
        request.headers(),
        request.method(),
        &path,
        services.shared_key(),
    ) {
        Ok(()) => next.run(request).await,
        Err(e) => PeerError::from(e).into_response(),
    }
}

/// Publishes a headers-level trace entry for every peer call when the trace
/// stream has subscribers.
async fn trace_peer_call(
    State(services): State<Arc<PeerServices>>,
    request: Request,
    next: Next,
) -> Response {
    if !services.trace.has_subscribers() {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let raw_query = request.uri().query().unwrap_or_default().to_string();
    let req_headers: HashMap<String, String> = request
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let response = next.run(request).await;

    let entry = TraceEntry {
        kind: TraceKind::Internal,
        node_name: services.node_name().to_string(),
        func_name: format!("peer.{}", path.rsplit('/').next().unwrap_or(&path)),
        time: Some(Utc::now()),
        req_info: TraceRequestInfo {
            time: Utc::now().to_rfc3339(),
            proto: "HTTP/1.1".to_string(),
            method,
            path,
            raw_query,
            headers: req_headers,
            client: String::new(),
        },
        resp_info: TraceResponseInfo {
            time: Utc::now().to_rfc3339(),
            headers: response
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                .collect(),
            status_code: response.status().as_u16(),
        },
        call_stats: TraceCallStats {
            latency: start.elapsed(),
            ..Default::default()
        },
    };
    services.trace.publish(&entry);
    response
}

/// Pulls a required query parameter; a missing or empty value is the
/// `"<name> is missing"` failure.
pub(crate) fn require<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> PeerResult<&'a str> {
    params
        .get(name)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or(PeerError::MissingParameter(name))
}

/// Encodes a payload with the endpoint's codec into a binary 200 response.
pub(crate) fn encoded<C: Codec, T: serde::Serialize>(codec: &C, value: &T) -> PeerResult<Response> {
    let bytes = codec.encode(value)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}
