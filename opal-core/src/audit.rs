//! Audit entry projection
//!
//! Every admin request is projected into exactly one audit entry at response
//! completion. The projection is side-effect free: it only reads the request
//! and response metadata handed to it.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current version of the audit log structure.
pub const AUDIT_VERSION: &str = "1";

/// Per-call details nested inside an audit entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiDetails {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bucket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(rename = "statusCode", default, skip_serializing_if = "is_zero")]
    pub status_code: u16,
    #[serde(
        rename = "timeToFirstByte",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub time_to_first_byte: String,
    #[serde(
        rename = "timeToResponse",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub time_to_response: String,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

/// One audit log entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub version: String,
    #[serde(
        rename = "deploymentid",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub deployment_id: String,
    pub time: String,
    pub trigger: String,
    pub api: ApiDetails,
    #[serde(
        rename = "remotehost",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub remote_host: String,
    #[serde(
        rename = "requestID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub request_id: String,
    #[serde(
        rename = "userAgent",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub user_agent: String,
    #[serde(
        rename = "requestClaims",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub req_claims: HashMap<String, Value>,
    #[serde(
        rename = "requestQuery",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub req_query: HashMap<String, String>,
    #[serde(
        rename = "requestHeader",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub req_header: HashMap<String, String>,
    #[serde(
        rename = "responseHeader",
        default,
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub resp_header: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Value>,
}

impl AuditEntry {
    /// Constructs an entry stamped now, in UTC at nanosecond precision.
    pub fn new(deployment_id: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            version: AUDIT_VERSION.to_string(),
            deployment_id: deployment_id.into(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            trigger: trigger.into(),
            ..Default::default()
        }
    }

    /// Records the response headers. The ETag value, if present, is stored
    /// without its surrounding double quotes.
    pub fn set_resp_header(&mut self, headers: HashMap<String, String>) {
        self.resp_header = headers;
        if let Some(etag) = self.resp_header.get_mut("ETag") {
            *etag = etag.trim_matches('"').to_string();
        }
    }
}

/// Joins header/query multi-values in insertion order.
pub fn join_values(values: &[String]) -> String {
    values.join(",")
}
