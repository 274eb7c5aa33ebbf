//! Long-lived peer stream handlers: listen, trace, console log, bandwidth
//! and federated metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::encoded;
use crate::error::{PeerError, PeerResult};
use crate::state::PeerServices;
use crate::stream::{finite_stream, streaming_response};
use opal_core::event::{
    new_pattern, validate_filter_rule_value, Event, EventName, RulesMap, TargetId,
};
use opal_core::console::{LogLevel, LogMask, LogRecord};
use opal_core::trace::{must_trace, TraceEntry, TraceOpts};
use opal_core::{Codec, GeneralCodec, Publisher, SUBSCRIBER_BUFFER};

/// One value of the federated metrics stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub node: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    pub collected_at: Option<DateTime<Utc>>,
}

fn single_value<'a>(
    params: &'a [(String, String)],
    name: &str,
) -> PeerResult<Option<&'a str>> {
    let mut values = params.iter().filter(|(k, _)| k == name).map(|(_, v)| v);
    let first = values.next();
    if values.next().is_some() {
        return Err(PeerError::Other("invalid request".to_string()));
    }
    Ok(first.map(String::as_str))
}

/// S3 notification stream. Builds a rules map from the prefix/suffix
/// pattern and the requested event names under a freshly minted target id,
/// optionally pinned to one bucket.
pub async fn listen(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<Vec<(String, String)>>,
) -> PeerResult<Response> {
    let prefix = single_value(&params, "prefix")?.unwrap_or_default().to_string();
    if !prefix.is_empty() {
        validate_filter_rule_value(&prefix)?;
    }
    let suffix = single_value(&params, "suffix")?.unwrap_or_default().to_string();
    if !suffix.is_empty() {
        validate_filter_rule_value(&suffix)?;
    }

    let mut event_names = Vec::new();
    for (_, value) in params.iter().filter(|(k, _)| k == "events") {
        event_names.push(EventName::parse(value)?);
    }

    let pattern = new_pattern(&prefix, &suffix);
    let target = TargetId {
        id: Uuid::new_v4().to_string(),
        name: "listen".to_string(),
    };
    let rules = RulesMap::new(&event_names, pattern, target);
    let bucket = single_value(&params, "bucket")?.unwrap_or_default().to_string();

    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let handle = Publisher::subscribe(&services.listen, tx, move |event: &Event| {
        if !bucket.is_empty()
            && !event.s3.bucket.name.is_empty()
            && event.s3.bucket.name != bucket
        {
            return false;
        }
        rules.match_simple(event.event_name, &event.s3.object.key)
    });

    Ok(streaming_response(rx, handle, Event::default(), |event| {
        GeneralCodec.encode(event)
    }))
}

fn trace_opts(params: &HashMap<String, String>) -> PeerResult<TraceOpts> {
    let flag = |name: &str| params.get(name).map(|v| v == "true").unwrap_or(false);
    let threshold = match params.get("threshold") {
        Some(raw) => Duration::from_millis(
            raw.parse::<u64>()
                .map_err(|_| PeerError::Other("invalid request".to_string()))?,
        ),
        None => Duration::ZERO,
    };
    Ok(TraceOpts {
        s3: flag("s3"),
        internal: flag("internal"),
        storage: flag("storage"),
        os: flag("os"),
        only_errors: flag("err"),
        threshold,
    })
}

/// Call trace stream, filtered by the subscriber's trace options.
pub async fn trace_stream(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<Response> {
    let opts = trace_opts(&params)?;

    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let handle =
        Publisher::subscribe(&services.trace, tx, move |entry: &TraceEntry| {
            must_trace(entry, &opts)
        });

    Ok(streaming_response(rx, handle, TraceEntry::default(), |entry| {
        GeneralCodec.encode(entry)
    }))
}

/// Console log stream of this node, optionally restricted to a severity
/// set via `levels=error,warning`.
pub async fn console_log(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<Response> {
    let mask = match params.get("levels") {
        None => LogMask::ALL,
        Some(csv) => {
            let mut levels = Vec::new();
            for part in csv.split(',').filter(|p| !p.is_empty()) {
                levels.push(
                    LogLevel::parse(part)
                        .ok_or_else(|| PeerError::Other(format!("unknown log level: {part}")))?,
                );
            }
            LogMask::of(&levels)
        }
    };

    let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
    let handle = Publisher::subscribe(&services.console, tx, move |record: &LogRecord| {
        mask.contains(record.level)
    });

    Ok(streaming_response(rx, handle, LogRecord::default(), |record| {
        GeneralCodec.encode(record)
    }))
}

/// Bandwidth report for the selected buckets. Buckets the monitor has not
/// seen yet report the configured default limit.
pub async fn get_bandwidth(
    State(services): State<Arc<PeerServices>>,
    Query(params): Query<HashMap<String, String>>,
) -> PeerResult<Response> {
    let buckets: Vec<String> = params
        .get("buckets")
        .map(|csv| {
            csv.split(',')
                .filter(|b| !b.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let mut report = services.monitor.get_report(&buckets).await;

    let default_limit = services.dynamic_config().default_bandwidth_limit;
    for bucket in &buckets {
        report
            .bucket_stats
            .entry(bucket.clone())
            .or_insert_with(|| crate::bandwidth::BandwidthDetails {
                limit_bytes_per_sec: default_limit,
                current_bandwidth_bytes_per_sec: 0.0,
            });
    }
    encoded(&GeneralCodec, &report)
}

fn collect_metrics(services: &PeerServices) -> Vec<Metric> {
    let node = services.node_name().to_string();
    let now = Some(Utc::now());
    let metric = |name: &str, value: f64| Metric {
        name: name.to_string(),
        node: node.clone(),
        value,
        labels: HashMap::new(),
        collected_at: now,
    };
    vec![
        metric("uptime_seconds", services.started.elapsed().as_secs_f64()),
        metric(
            "listen_subscribers",
            services.listen.num_subscribers() as f64,
        ),
        metric("trace_subscribers", services.trace.num_subscribers() as f64),
        metric(
            "console_subscribers",
            services.console.num_subscribers() as f64,
        ),
    ]
}

/// Streams this node's metric generators to the coordinator, one metric per
/// envelope, ending when the generators are drained.
pub async fn get_peer_metrics(State(services): State<Arc<PeerServices>>) -> PeerResult<Response> {
    let metrics = collect_metrics(&services);
    let (tx, rx) = mpsc::channel(metrics.len().max(1));
    tokio::spawn(async move {
        for metric in metrics {
            if tx.send(metric).await.is_err() {
                break;
            }
        }
    });
    Ok(finite_stream(rx, |metric: &Metric| {
        GeneralCodec.encode(metric)
    }))
}
