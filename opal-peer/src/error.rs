//! Error types for the peer RPC and admin surfaces
//!
//! The two surfaces speak different error dialects. Peer RPC failures are
//! HTTP 403 with the literal reason in a plain-text body; peer clients parse
//! that text as-is. Admin failures are S3-style XML error documents.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::object::StoreError;
use opal_core::{CodecError, EventError};

/// Response header carrying the request id on the admin surface.
pub const REQUEST_ID_HEADER: &str = "x-opal-request-id";

/// Peer RPC errors. Every variant maps to 403 with the display text as body.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("{0} is missing")]
    MissingParameter(&'static str),

    #[error("server not initialized")]
    ServerNotInitialized,

    #[error("unsupported signal: only restart, stop and reload-dynamic signals are supported")]
    UnsupportedSignal,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

impl PeerError {
    pub fn other(err: impl std::fmt::Display) -> Self {
        Self::Other(err.to_string())
    }
}

impl IntoResponse for PeerError {
    fn into_response(self) -> Response {
        (StatusCode::FORBIDDEN, self.to_string()).into_response()
    }
}

pub type PeerResult<T> = Result<T, PeerError>;

/// Admin surface errors, rendered as S3-style XML documents.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error("Missing required header for this request: Content-Md5.")]
    MissingContentMd5,

    #[error("The Content-Md5 you specified is not valid.")]
    InvalidDigest,

    #[error("The specified bucket does not exist")]
    NoSuchBucket(String),

    #[error("The lifecycle configuration does not exist")]
    NoSuchLifecycleConfiguration(String),

    #[error("The XML you provided was not well-formed or did not validate: {0}")]
    MalformedXml(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Access Denied: {0}")]
    AccessDenied(String),

    #[error("Server not initialized, please try again.")]
    ServerNotInitialized,

    #[error("We encountered an internal error, please try again: {0}")]
    InternalError(String),
}

impl AdminError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingContentMd5 => "MissingContentMD5",
            Self::InvalidDigest => "InvalidDigest",
            Self::NoSuchBucket(_) => "NoSuchBucket",
            Self::NoSuchLifecycleConfiguration(_) => "NoSuchLifecycleConfiguration",
            Self::MalformedXml(_) => "MalformedXML",
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::AccessDenied(_) => "AccessDenied",
            Self::ServerNotInitialized => "XOpalServerNotInitialized",
            Self::InternalError(_) => "InternalError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::MissingContentMd5
            | Self::InvalidDigest
            | Self::MalformedXml(_)
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NoSuchBucket(_) | Self::NoSuchLifecycleConfiguration(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ServerNotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn bucket(&self) -> Option<&str> {
        match self {
            Self::NoSuchBucket(bucket) | Self::NoSuchLifecycleConfiguration(bucket) => {
                Some(bucket.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename = "Error")]
struct ErrorDocument {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "BucketName", skip_serializing_if = "Option::is_none")]
    bucket_name: Option<String>,
    #[serde(rename = "RequestId")]
    request_id: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let doc = ErrorDocument {
            code: self.code().to_string(),
            message: self.to_string(),
            bucket_name: self.bucket().map(str::to_string),
            request_id: request_id.clone(),
        };
        let xml = quick_xml::se::to_string(&doc).unwrap_or_else(|_| {
            format!(
                "<Error><Code>{}</Code><RequestId>{}</RequestId></Error>",
                doc.code, doc.request_id
            )
        });
        let body = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml);
        let mut response = (self.status(), body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/xml"),
        );
        if let Ok(value) = header::HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(header::HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
