//! Service-level peer handlers: health, locks, signals, updates, profiling,
//! disks and heal status

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;

use super::{encoded, require};
use crate::error::{PeerError, PeerResult};
use crate::profiler::{start_profiler, ProfileKind};
use crate::state::{PeerServices, ServiceSignal};
use crate::tracker::BloomCycleRequest;
use crate::update::{apply_server_update, ServerUpdateInfo};
use opal_core::console::LogLevel;
use opal_core::{Codec, GeneralCodec};

/// Liveness ping; envelope validation is the whole check.
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Snapshot of the local lock map.
pub async fn get_locks(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    let snapshot = services.locks.snapshot().await;
    encoded(&GeneralCodec, &snapshot)
}

/// Delivers a service signal. Restart and stop ride the 1-capacity signal
/// channel; reload-dynamic applies in place.
pub async fn signal_service(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    let raw = require(&params, "signal")?;
    let value: i64 = raw.parse().map_err(PeerError::other)?;
    match ServiceSignal::from_wire(value) {
        Some(signal @ (ServiceSignal::Restart | ServiceSignal::Stop)) => {
            services.send_signal(signal).await?;
        }
        Some(ServiceSignal::ReloadDynamic) => {
            services.object_layer()?;
            services.reload_dynamic().await?;
        }
        None => return Err(PeerError::UnsupportedSignal),
    }
    Ok(StatusCode::OK)
}

/// Stages a verified binary; the coordinator restarts us separately.
pub async fn server_update(
    State(services): State<Arc<PeerServices>>,
    body: Bytes,
) -> PeerResult<StatusCode> {
    let info: ServerUpdateInfo = GeneralCodec.decode(&body)?;
    let staged = apply_server_update(&info, &services.config.update_staging_dir)
        .await
        .map_err(PeerError::other)?;
    services.console_log(
        LogLevel::Info,
        format!("server update staged at {}", staged.display()),
    );
    Ok(StatusCode::OK)
}

/// Starts the requested profile kinds, replacing any that already run.
pub async fn start_profiling(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<StatusCode> {
    let raw = require(&params, "profiler")?;
    let mut kinds = Vec::new();
    for part in raw.split(',').filter(|p| !p.is_empty()) {
        kinds.push(ProfileKind::parse(part).map_err(PeerError::other)?);
    }
    if kinds.is_empty() {
        return Err(PeerError::MissingParameter("profiler"));
    }

    let mut profilers = services.profilers.lock().expect("profiler set poisoned");
    for kind in &kinds {
        if let Some(mut running) = profilers.remove(kind) {
            running.stop();
        }
    }
    for kind in kinds {
        let profiler = start_profiler(kind).map_err(PeerError::other)?;
        profilers.insert(kind, profiler);
    }
    Ok(StatusCode::OK)
}

/// Merged dump of every running profile, keyed by kind.
pub async fn download_profiling_data(
    State(services): State<Arc<PeerServices>>,
) -> PeerResult<Response> {
    let dumps: HashMap<String, Vec<u8>> = {
        let mut profilers = services.profilers.lock().expect("profiler set poisoned");
        profilers
            .iter_mut()
            .map(|(kind, profiler)| (kind.to_string(), profiler.dump()))
            .collect()
    };
    encoded(&GeneralCodec, &dumps)
}

/// Ids of all healthy local disks across pools and sets.
pub async fn get_local_disk_ids(
    State(services): State<Arc<PeerServices>>,
) -> PeerResult<Response> {
    let layer = services.object_layer()?;
    let ids: Vec<String> = layer
        .local_disks()
        .into_iter()
        .filter(|d| d.local && d.healthy && !d.id.is_empty())
        .map(|d| d.id)
        .collect();
    encoded(&GeneralCodec, &ids)
}

pub async fn background_heal_status(
    State(services): State<Arc<PeerServices>>,
) -> PeerResult<Response> {
    services.object_layer()?;
    let state = services.heal.snapshot().await;
    encoded(&GeneralCodec, &state)
}

/// Advances the data-update filter generation and returns the prior filter.
pub async fn cycle_bloom(
    State(services): State<Arc<PeerServices>>,
    body: Bytes,
) -> PeerResult<Response> {
    let request: BloomCycleRequest = if body.is_empty() {
        BloomCycleRequest::default()
    } else {
        GeneralCodec.decode(&body)?
    };
    let response = {
        let mut tracker = services.tracker.lock().expect("tracker poisoned");
        tracker.cycle_filter(&request)
    };
    encoded(&GeneralCodec, &response)
}
