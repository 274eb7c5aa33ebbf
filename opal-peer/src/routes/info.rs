//! Host probe peer handlers
//!
//! Probe failures surface inside the payload, never through the HTTP
//! status; the coordinator always gets one envelope per node.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::Response;
use futures::StreamExt;

use super::encoded;
use crate::error::PeerResult;
use crate::probe;
use crate::state::PeerServices;
use crate::stream::{trailer_response, with_keep_alive};
use opal_core::{Codec, GeneralCodec};

pub async fn server_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    let payload = probe::server_properties(
        &services.config.bind_addr,
        &services.config.region,
        services.started,
    );
    encoded(&GeneralCodec, &payload)
}

pub async fn cpu_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    encoded(&GeneralCodec, &probe::cpu_info(&services.config.bind_addr))
}

pub async fn mem_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    encoded(&GeneralCodec, &probe::mem_info(&services.config.bind_addr))
}

pub async fn os_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    encoded(&GeneralCodec, &probe::os_info(&services.config.bind_addr))
}

pub async fn proc_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    encoded(&GeneralCodec, &probe::proc_info(&services.config.bind_addr))
}

pub async fn disk_hw_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    encoded(
        &GeneralCodec,
        &probe::disk_hw_info(&services.config.bind_addr),
    )
}

/// Serial and parallel latency pass over the object layer's local disks.
pub async fn drive_info(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    let layer = services.object_layer()?;
    let disks = layer.local_disks();
    let payload = probe::drives_info(&services.config.bind_addr, &disks).await;
    encoded(&GeneralCodec, &payload)
}

/// Absorbs the caller's measurement body and reports the outcome in the
/// `FinalStatus` trailer: success exactly when the bytes read equal the
/// declared Content-Length.
pub async fn net_info(headers: HeaderMap, body: Body) -> Response {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut read: u64 = 0;
    let mut failure: Option<String> = None;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => read += bytes.len() as u64,
            Err(e) => {
                failure = Some(e.to_string());
                break;
            }
        }
    }

    let status = match (failure, declared) {
        (Some(e), _) => e,
        (None, Some(expected)) if expected != read => {
            format!("net probe: short read: expected {} found {}", expected, read)
        }
        _ => "Success".to_string(),
    };
    trailer_response(&status)
}

/// Long-poll wrapper around the net probe: whitespace keep-alives until the
/// measurement finishes, then the encoded payload.
pub async fn dispatch_net_info(State(services): State<Arc<PeerServices>>) -> Response {
    let addr = services.config.bind_addr.clone();
    with_keep_alive(async move {
        let payload = vec![probe::net_perf(&addr).await];
        Ok(GeneralCodec.encode(&payload)?)
    })
}
