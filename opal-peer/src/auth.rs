//! Request envelope validation for the peer RPC surface
//!
//! Every inbound peer call carries a signature over the request line and a
//! timestamp. The signature is HMAC-SHA256 with the cluster shared key; the
//! timestamp must fall inside the skew window. Validation happens before any
//! handler touches state, and a failed request is answered with 403 and the
//! literal reason.

use std::time::Duration;

use axum::http::{HeaderMap, Method};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `method\npath\ntimestamp`.
pub const SIGNATURE_HEADER: &str = "x-opal-signature";

/// RFC 3339 timestamp of the sending peer.
pub const TIME_HEADER: &str = "x-opal-time";

/// Tolerated clock difference between peers.
pub const SKEW_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("signature header is missing")]
    MissingSignature,

    #[error("request signature does not match")]
    SignatureMismatch,

    #[error("timestamp header is missing")]
    MissingTimestamp,

    #[error("invalid timestamp header: {0}")]
    InvalidTimestamp(String),

    #[error("request timestamp outside allowed skew window")]
    OutsideSkewWindow,
}

fn canonical_string(method: &Method, path: &str, timestamp: &str) -> String {
    format!("{}\n{}\n{}", method, path, timestamp)
}

/// Computes the signature a peer puts in [`SIGNATURE_HEADER`].
pub fn sign_request(shared_key: &[u8], method: &Method, path: &str, timestamp: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(shared_key).expect("HMAC accepts keys of any length");
    mac.update(canonical_string(method, path, timestamp).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Validates the envelope of an inbound peer request.
pub fn validate_peer_request(
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    shared_key: &[u8],
) -> Result<(), AuthError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingSignature)?;
    let timestamp = headers
        .get(TIME_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingTimestamp)?;

    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| AuthError::InvalidTimestamp(e.to_string()))?
        .with_timezone(&Utc);
    let skew = Utc::now().signed_duration_since(sent_at);
    let window = chrono::Duration::from_std(SKEW_WINDOW).expect("skew window fits");
    if skew > window || skew < -window {
        return Err(AuthError::OutsideSkewWindow);
    }

    let raw = hex::decode(signature).map_err(|_| AuthError::SignatureMismatch)?;
    let mut mac =
        HmacSha256::new_from_slice(shared_key).expect("HMAC accepts keys of any length");
    mac.update(canonical_string(method, path, timestamp).as_bytes());
    mac.verify_slice(&raw)
        .map_err(|_| AuthError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"cluster-shared-key";

    fn signed_headers(method: &Method, path: &str, timestamp: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            sign_request(KEY, method, path, timestamp).parse().unwrap(),
        );
        headers.insert(TIME_HEADER, timestamp.parse().unwrap());
        headers
    }

    #[test]
    fn valid_request_passes() {
        let now = Utc::now().to_rfc3339();
        let headers = signed_headers(&Method::POST, "/opal/peer/v1/health", &now);
        validate_peer_request(&headers, &Method::POST, "/opal/peer/v1/health", KEY).unwrap();
    }

    #[test]
    fn missing_signature_fails() {
        let mut headers = HeaderMap::new();
        headers.insert(TIME_HEADER, Utc::now().to_rfc3339().parse().unwrap());
        let err =
            validate_peer_request(&headers, &Method::POST, "/p", KEY).unwrap_err();
        assert!(matches!(err, AuthError::MissingSignature));
    }

    #[test]
    fn tampered_path_fails() {
        let now = Utc::now().to_rfc3339();
        let headers = signed_headers(&Method::POST, "/opal/peer/v1/health", &now);
        let err = validate_peer_request(&headers, &Method::POST, "/opal/peer/v1/locks", KEY)
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn wrong_key_fails() {
        let now = Utc::now().to_rfc3339();
        let headers = signed_headers(&Method::POST, "/p", &now);
        let err = validate_peer_request(&headers, &Method::POST, "/p", b"other-key").unwrap_err();
        assert!(matches!(err, AuthError::SignatureMismatch));
    }

    #[test]
    fn stale_timestamp_fails() {
        let stale = (Utc::now() - chrono::Duration::minutes(20)).to_rfc3339();
        let headers = signed_headers(&Method::POST, "/p", &stale);
        let err = validate_peer_request(&headers, &Method::POST, "/p", KEY).unwrap_err();
        assert!(matches!(err, AuthError::OutsideSkewWindow));
    }

    #[test]
    fn future_timestamp_fails() {
        let future = (Utc::now() + chrono::Duration::minutes(20)).to_rfc3339();
        let headers = signed_headers(&Method::POST, "/p", &future);
        let err = validate_peer_request(&headers, &Method::POST, "/p", KEY).unwrap_err();
        assert!(matches!(err, AuthError::OutsideSkewWindow));
    }

    #[test]
    fn garbage_timestamp_fails() {
        let mut headers = signed_headers(&Method::POST, "/p", "not-a-time");
        headers.insert(TIME_HEADER, "not-a-time".parse().unwrap());
        let err = validate_peer_request(&headers, &Method::POST, "/p", KEY).unwrap_err();
        assert!(matches!(err, AuthError::InvalidTimestamp(_)));
    }
}
