//! Operator-facing admin surface
//!
//! Carries the bucket configuration endpoints. Unlike the peer RPC surface,
//! failures here are S3-style XML documents, and every request is projected
//! into exactly one audit entry at response completion.

pub mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::put;
use axum::Router;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::auth::SKEW_WINDOW;
use crate::error::{AdminError, REQUEST_ID_HEADER};
use crate::state::PeerServices;
use opal_core::audit::AuditEntry;

type HmacSha256 = Hmac<Sha256>;

/// RFC 3339 timestamp the admin client signs over.
pub const ADMIN_DATE_HEADER: &str = "x-opal-date";

const ADMIN_AUTH_SCHEME: &str = "OPAL4-HMAC-SHA256";

/// Builds the admin router.
pub fn admin_router(services: Arc<PeerServices>) -> Router {
    Router::new()
        .route(
            "/:bucket",
            put(lifecycle::put_bucket_config)
                .get(lifecycle::get_bucket_config)
                .delete(lifecycle::delete_bucket_config),
        )
        .layer(middleware::from_fn_with_state(
            services.clone(),
            audit_admin_call,
        ))
        .with_state(services)
}

/// Authorization header value for an admin call.
pub fn sign_admin_request(
    access_key: &str,
    secret_key: &str,
    method: &Method,
    path: &str,
    date: &str,
) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret_key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(format!("{}\n{}\n{}", method, path, date).as_bytes());
    format!(
        "{} Credential={},Signature={}",
        ADMIN_AUTH_SCHEME,
        access_key,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Credential + signature + freshness check for an admin call.
pub fn check_admin_auth(
    services: &PeerServices,
    headers: &HeaderMap,
    method: &Method,
    path: &str,
) -> Result<(), AdminError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AdminError::AccessDenied("authorization header is missing".to_string()))?;
    let rest = authorization
        .strip_prefix(ADMIN_AUTH_SCHEME)
        .map(str::trim)
        .ok_or_else(|| AdminError::AccessDenied("unsupported authorization scheme".to_string()))?;

    let mut access_key = "";
    let mut signature = "";
    for part in rest.split(',') {
        if let Some(v) = part.trim().strip_prefix("Credential=") {
            access_key = v;
        } else if let Some(v) = part.trim().strip_prefix("Signature=") {
            signature = v;
        }
    }
    if access_key != services.config.admin_access_key {
        return Err(AdminError::AccessDenied("unknown access key".to_string()));
    }

    let date = headers
        .get(ADMIN_DATE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AdminError::AccessDenied("date header is missing".to_string()))?;
    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(date)
        .map_err(|e| AdminError::AccessDenied(format!("invalid date header: {e}")))?
        .with_timezone(&Utc);
    let window = chrono::Duration::from_std(SKEW_WINDOW).expect("skew window fits");
    let skew = Utc::now().signed_duration_since(sent_at);
    if skew > window || skew < -window {
        return Err(AdminError::AccessDenied(
            "request date outside allowed window".to_string(),
        ));
    }

    let raw = hex::decode(signature)
        .map_err(|_| AdminError::AccessDenied("malformed signature".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(services.config.admin_secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}\n{}\n{}", method, path, date).as_bytes());
    mac.verify_slice(&raw)
        .map_err(|_| AdminError::AccessDenied("signature does not match".to_string()))
}

fn join_query(raw: Option<&str>) -> HashMap<String, String> {
    let mut query: HashMap<String, String> = HashMap::new();
    for pair in raw.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let entry = query.entry(key.to_string()).or_default();
        if !entry.is_empty() {
            entry.push(',');
        }
        entry.push_str(value);
    }
    query
}

fn join_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut joined: HashMap<String, String> = HashMap::new();
    for key in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        joined.insert(canonical_header_name(key.as_str()), values.join(","));
    }
    joined
}

// Header keys are recorded in their canonical capitalised form, so the
// audit ETag rule applies to the key readers expect.
fn canonical_header_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("etag") {
        return "ETag".to_string();
    }
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn api_name(method: &Method, query: &HashMap<String, String>) -> String {
    let subresource = if query.contains_key("lifecycle") {
        "Lifecycle"
    } else {
        "Config"
    };
    let verb = if *method == Method::PUT {
        "PutBucket"
    } else if *method == Method::GET {
        "GetBucket"
    } else if *method == Method::DELETE {
        "DeleteBucket"
    } else {
        "Bucket"
    };
    format!("{verb}{subresource}")
}

/// Projects each admin exchange into one audit entry, emitted only once the
/// response is final so it carries the real status and headers.
async fn audit_admin_call(
    State(services): State<Arc<PeerServices>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = join_query(request.uri().query());
    let req_header = join_headers(request.headers());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let remote_host = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut response = next.run(request).await;

    if !response.headers().contains_key(REQUEST_ID_HEADER) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
    }

    let mut entry = AuditEntry::new(&services.config.deployment_id, "incoming");
    entry.api.name = api_name(&method, &query);
    entry.api.bucket = path.trim_start_matches('/').to_string();
    entry.api.status = response
        .status()
        .canonical_reason()
        .unwrap_or_default()
        .to_string();
    entry.api.status_code = response.status().as_u16();
    entry.api.time_to_response = format!("{}ns", start.elapsed().as_nanos());
    entry.remote_host = remote_host;
    entry.user_agent = user_agent;
    entry.request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    entry.req_query = query;
    entry.req_header = req_header;
    entry.set_resp_header(join_headers(response.headers()));

    if let Ok(json) = serde_json::to_string(&entry) {
        tracing::info!(target: "audit", "{json}");
    }
    services.audit.publish(&entry);

    response
}
