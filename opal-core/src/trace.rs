//! HTTP trace records for the peer trace stream

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    #[default]
    S3,
    Internal,
    Storage,
    Os,
}

/// Subscriber-side trace selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceOpts {
    pub s3: bool,
    pub internal: bool,
    pub storage: bool,
    pub os: bool,
    pub only_errors: bool,
    #[serde(default)]
    pub threshold: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRequestInfo {
    pub time: String,
    pub proto: String,
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_query: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceResponseInfo {
    pub time: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub status_code: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceCallStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
    #[serde(default)]
    pub latency: Duration,
    #[serde(default)]
    pub time_to_first_byte: Duration,
}

/// One traced call. The zero value is the stream keep-alive envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub kind: TraceKind,
    pub node_name: String,
    pub func_name: String,
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub req_info: TraceRequestInfo,
    #[serde(default)]
    pub resp_info: TraceResponseInfo,
    #[serde(default)]
    pub call_stats: TraceCallStats,
}

impl TraceEntry {
    pub fn is_keep_alive(&self) -> bool {
        self.time.is_none()
    }
}

/// Whether `entry` passes the subscriber's trace options.
pub fn must_trace(entry: &TraceEntry, opts: &TraceOpts) -> bool {
    let kind_enabled = match entry.kind {
        TraceKind::S3 => opts.s3,
        TraceKind::Internal => opts.internal,
        TraceKind::Storage => opts.storage,
        TraceKind::Os => opts.os,
    };
    if !kind_enabled {
        return false;
    }
    if opts.only_errors && entry.resp_info.status_code < 400 {
        return false;
    }
    if !opts.threshold.is_zero() && entry.call_stats.latency < opts.threshold {
        return false;
    }
    true
}
