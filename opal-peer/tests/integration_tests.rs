//! Integration tests for the peer RPC and admin surfaces
//!
//! Every test runs the real routers against in-memory backing stores, so
//! the full envelope/codec/handler path is exercised end to end.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use http_body_util::BodyExt;
use md5::{Digest, Md5};
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;

use opal_core::{Codec, CompactCodec, GeneralCodec};
use opal_peer::admin::{sign_admin_request, ADMIN_DATE_HEADER};
use opal_peer::auth::{sign_request, SIGNATURE_HEADER, TIME_HEADER};
use opal_peer::bucketmeta::{BucketStats, BucketTarget, NoopNotifier, ReplicationStats};
use opal_peer::config::PeerConfig;
use opal_peer::iam::MemoryIamStore;
use opal_peer::object::MemoryObjectLayer;
use opal_peer::server::{create_router, start_background_server};
use opal_peer::state::{PeerServices, ServiceSignal};

const SHARED_KEY_HEX: &str = "aabbccddeeff00112233445566778899";
const ADMIN_ACCESS: &str = "opaladmin";
const ADMIN_SECRET: &str = "opaladmin-secret";

struct TestNode {
    services: Arc<PeerServices>,
    signal_rx: mpsc::Receiver<ServiceSignal>,
    iam_store: Arc<MemoryIamStore>,
    layer: Arc<MemoryObjectLayer>,
}

fn test_node() -> TestNode {
    let config = PeerConfig {
        node_name: "test-node".to_string(),
        deployment_id: "dep-test".to_string(),
        shared_key_hex: SHARED_KEY_HEX.to_string(),
        admin_access_key: ADMIN_ACCESS.to_string(),
        admin_secret_key: ADMIN_SECRET.to_string(),
        ..Default::default()
    };
    let iam_store = Arc::new(MemoryIamStore::new());
    let (services, signal_rx) =
        PeerServices::new(config, iam_store.clone(), Arc::new(NoopNotifier));
    let layer = Arc::new(MemoryObjectLayer::new());
    services.set_object_layer(layer.clone());
    TestNode {
        services,
        signal_rx,
        iam_store,
        layer,
    }
}

fn shared_key() -> Vec<u8> {
    hex::decode(SHARED_KEY_HEX).unwrap()
}

fn peer_path(method: &str) -> String {
    format!("/opal/peer/v1/{}", method)
}

fn sign_headers(method: &Method, path: &str) -> (HeaderValue, HeaderValue) {
    let now = chrono::Utc::now().to_rfc3339();
    let signature = sign_request(&shared_key(), method, path, &now);
    (
        HeaderValue::from_str(&signature).unwrap(),
        HeaderValue::from_str(&now).unwrap(),
    )
}

fn test_server(node: &TestNode) -> TestServer {
    TestServer::new(create_router(node.services.clone())).unwrap()
}

/// Splits a concatenation of CBOR values into decoded frames.
fn decode_frames<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Vec<T> {
    let mut frames = Vec::new();
    let mut cursor = Cursor::new(bytes);
    while (cursor.position() as usize) < bytes.len() {
        match ciborium::from_reader(&mut cursor) {
            Ok(value) => frames.push(value),
            Err(_) => break,
        }
    }
    frames
}

// ============ Envelope tests ============

#[tokio::test]
async fn unsigned_request_is_rejected() {
    let node = test_node();
    let server = test_server(&node);

    let response = server.post(&peer_path("health")).await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("signature header is missing"));
}

#[tokio::test]
async fn signed_health_passes() {
    let node = test_node();
    let server = test_server(&node);

    let path = peer_path("health");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn stale_request_is_rejected_and_state_untouched() {
    let node = test_node();
    node.layer.add_bucket("photos");
    let server = test_server(&node);

    node.services
        .replication_stats
        .set(
            "photos",
            ReplicationStats {
                pending_count: 3,
                ..Default::default()
            },
        )
        .await;

    // Timestamp 20 minutes in the past, correctly signed.
    let path = peer_path("deletebucketmetadata");
    let stale = (chrono::Utc::now() - chrono::Duration::minutes(20)).to_rfc3339();
    let signature = sign_request(&shared_key(), &Method::POST, &path, &stale);
    let response = server
        .post(&path)
        .add_query_param("bucket", "photos")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .add_header(
            HeaderName::from_static(TIME_HEADER),
            HeaderValue::from_str(&stale).unwrap(),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("skew"));

    // Nothing was evicted.
    let stats = node.services.replication_stats.get("photos").await;
    assert_eq!(stats.pending_count, 3);
}

#[tokio::test]
async fn wrong_key_never_mutates_state() {
    let node = test_node();
    let server = test_server(&node);
    node.services
        .replication_stats
        .set("b", ReplicationStats::default())
        .await;

    let path = peer_path("deletebucketmetadata");
    let now = chrono::Utc::now().to_rfc3339();
    let signature = sign_request(b"not-the-cluster-key", &Method::POST, &path, &now);
    let response = server
        .post(&path)
        .add_query_param("bucket", "b")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .add_header(
            HeaderName::from_static(TIME_HEADER),
            HeaderValue::from_str(&now).unwrap(),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
}

// ============ Parameter and codec errors ============

#[tokio::test]
async fn missing_parameter_is_literal_text() {
    let node = test_node();
    let server = test_server(&node);

    let path = peer_path("deletepolicy");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "policy is missing");
}

#[tokio::test]
async fn malformed_body_is_decoder_error() {
    let node = test_node();
    let server = test_server(&node);

    let path = peer_path("cyclebloom");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .bytes(vec![0xff, 0x00, 0x13].into())
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("decode failed"));
}

// ============ IAM ============

#[tokio::test]
async fn iam_load_and_delete_round_trip() {
    let node = test_node();
    node.iam_store
        .put_policy("readonly", json!({"Version": "2012-10-17"}));
    let server = test_server(&node);

    let path = peer_path("loadpolicy");
    let (sig, time) = sign_headers(&Method::POST, &path);
    server
        .post(&path)
        .add_query_param("policy", "readonly")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await
        .assert_status_ok();
    assert!(node.services.iam.policy("readonly").await.is_some());

    let path = peer_path("deletepolicy");
    let (sig, time) = sign_headers(&Method::POST, &path);
    server
        .post(&path)
        .add_query_param("policy", "readonly")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await
        .assert_status_ok();
    assert!(node.services.iam.policy("readonly").await.is_none());

    // Reloading a policy the store no longer has propagates the error text.
    let path = peer_path("loadpolicy");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_query_param("policy", "ghost")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("policy not found"));
}

// ============ Bucket caches ============

#[tokio::test]
async fn bucket_stats_use_compact_codec() {
    let node = test_node();
    let server = test_server(&node);
    node.services
        .replication_stats
        .set(
            "photos",
            ReplicationStats {
                replicated_size: 4096,
                pending_count: 2,
                ..Default::default()
            },
        )
        .await;

    let path = peer_path("getbucketstats");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_query_param("bucket", "photos")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status_ok();

    let body = response.into_bytes();
    let stats: BucketStats = CompactCodec.decode(&body).unwrap();
    assert_eq!(stats.replication_stats.replicated_size, 4096);
    assert_eq!(stats.replication_stats.pending_count, 2);
}

#[tokio::test]
async fn delete_then_load_bucket_metadata_reflects_post_load_state() {
    let node = test_node();
    node.layer.add_bucket("photos");
    let server = test_server(&node);

    node.services
        .replication_stats
        .set(
            "photos",
            ReplicationStats {
                failed_count: 9,
                ..Default::default()
            },
        )
        .await;

    let path = peer_path("deletebucketmetadata");
    let (sig, time) = sign_headers(&Method::POST, &path);
    server
        .post(&path)
        .add_query_param("bucket", "photos")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await
        .assert_status_ok();

    let path = peer_path("loadbucketmetadata");
    let (sig, time) = sign_headers(&Method::POST, &path);
    server
        .post(&path)
        .add_query_param("bucket", "photos")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await
        .assert_status_ok();
    assert!(node.services.bucket_metadata.get("photos").await.is_some());

    // Stats were evicted by the delete and start from zero after the load.
    let path = peer_path("getbucketstats");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_query_param("bucket", "photos")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    let body = response.into_bytes();
    let stats: BucketStats = CompactCodec.decode(&body).unwrap();
    assert_eq!(stats.replication_stats, ReplicationStats::default());
}

// ============ Signals ============

#[tokio::test]
async fn unknown_signal_is_rejected_without_enqueue() {
    let mut node = test_node();
    let server = test_server(&node);

    let path = peer_path("signalservice");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_query_param("signal", "9")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().starts_with("unsupported signal"));
    assert!(node.signal_rx.try_recv().is_err());
}

#[tokio::test]
async fn restart_signal_reaches_the_service_channel() {
    let mut node = test_node();
    let server = test_server(&node);

    let path = peer_path("signalservice");
    let (sig, time) = sign_headers(&Method::POST, &path);
    server
        .post(&path)
        .add_query_param("signal", "1")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await
        .assert_status_ok();
    assert_eq!(node.signal_rx.recv().await, Some(ServiceSignal::Restart));
}

// ============ Profiling ============

#[tokio::test]
async fn start_profiling_is_idempotent() {
    let node = test_node();
    let server = test_server(&node);

    for _ in 0..2 {
        let path = peer_path("startprofiling");
        let (sig, time) = sign_headers(&Method::POST, &path);
        server
            .post(&path)
            .add_query_param("profiler", "cpu")
            .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
            .add_header(HeaderName::from_static(TIME_HEADER), time)
            .await
            .assert_status_ok();
    }
    assert_eq!(node.services.profilers.lock().unwrap().len(), 1);

    let path = peer_path("downloadprofilingdata");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status_ok();
    let body = response.into_bytes();
    let dumps: HashMap<String, Vec<u8>> = GeneralCodec.decode(&body).unwrap();
    assert!(!dumps["cpu"].is_empty());
}

#[tokio::test]
async fn unknown_profiler_kind_aborts() {
    let node = test_node();
    let server = test_server(&node);

    let path = peer_path("startprofiling");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let response = server
        .post(&path)
        .add_query_param("profiler", "goroutines")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), sig)
        .add_header(HeaderName::from_static(TIME_HEADER), time)
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("unknown profiler type"));
}

// ============ Streaming: listen ============

#[tokio::test]
async fn listen_filters_and_keep_alives() {
    let node = test_node();
    let addr = start_background_server(node.services.clone()).await.unwrap();

    let path = peer_path("listen");
    let now = chrono::Utc::now().to_rfc3339();
    let signature = sign_request(&shared_key(), &Method::POST, &path, &now);
    let url = format!(
        "http://{}{}?prefix=logs/&suffix=.json&events=s3:ObjectCreated:Put&bucket=b",
        addr, path
    );
    let response = reqwest::Client::new()
        .post(&url)
        .header(SIGNATURE_HEADER, signature.as_str())
        .header(TIME_HEADER, now.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    // Give the subscription a moment to register, then publish.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut matching = opal_core::event::Event {
        event_name: opal_core::event::EventName::ObjectCreatedPut,
        event_time: chrono::Utc::now().to_rfc3339(),
        ..Default::default()
    };
    matching.s3.bucket.name = "b".to_string();
    matching.s3.object.key = "logs/a.json".to_string();
    assert_eq!(node.services.publish_event(&matching), 1);

    let mut other = matching.clone();
    other.s3.object.key = "other/x.txt".to_string();
    assert_eq!(node.services.publish_event(&other), 0);

    // First frame is the matching event, the next is exactly one zero
    // envelope after the keep-alive interval.
    let mut buffer = Vec::new();
    let mut frames: Vec<opal_core::event::Event> = Vec::new();
    let mut stream = Box::pin(response.bytes_stream());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while frames.len() < 2 && tokio::time::Instant::now() < deadline {
        let chunk = tokio::time::timeout_at(deadline, futures::StreamExt::next(&mut stream))
            .await
            .ok()
            .flatten();
        let Some(Ok(chunk)) = chunk else { break };
        buffer.extend_from_slice(&chunk);
        frames = decode_frames(&buffer);
    }

    assert!(frames.len() >= 2, "expected event plus keep-alive");
    assert_eq!(frames[0].s3.object.key, "logs/a.json");
    assert!(frames[1].is_keep_alive());
    if frames.len() > 2 {
        // No second keep-alive burst and never the non-matching event.
        assert!(frames[2..].iter().all(|f| f.is_keep_alive()));
        assert!(frames.len() <= 3);
    }
}

// ============ Metrics and net probes ============

#[tokio::test]
async fn peer_metrics_validate_before_any_write() {
    let node = test_node();
    let router = create_router(node.services.clone());

    let request = Request::builder()
        .method(Method::POST)
        .uri(peer_path("getpeermetrics"))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn peer_metrics_stream_is_finite() {
    let node = test_node();
    let router = create_router(node.services.clone());

    let path = peer_path("getpeermetrics");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let request = Request::builder()
        .method(Method::POST)
        .uri(&path)
        .header(SIGNATURE_HEADER, sig)
        .header(TIME_HEADER, time)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let metrics: Vec<opal_peer::routes::streams::Metric> = decode_frames(&bytes);
    assert!(metrics.iter().any(|m| m.name == "uptime_seconds"));
}

#[tokio::test]
async fn netinfo_reports_final_status_trailer() {
    let node = test_node();

    // Body length matches Content-Length: success.
    let path = peer_path("netinfo");
    let (sig, time) = sign_headers(&Method::POST, &path);
    let request = Request::builder()
        .method(Method::POST)
        .uri(&path)
        .header(SIGNATURE_HEADER, sig)
        .header(TIME_HEADER, time)
        .header(header::CONTENT_LENGTH, "5")
        .body(Body::from("hello"))
        .unwrap();
    let response = create_router(node.services.clone())
        .oneshot(request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["trailer"], "FinalStatus");
    let collected = response.into_body().collect().await.unwrap();
    let trailers = collected.trailers().cloned().unwrap_or_default();
    assert_eq!(trailers["finalstatus"], "Success");

    // Declared length larger than the body: reported as a short read.
    let (sig, time) = sign_headers(&Method::POST, &path);
    let request = Request::builder()
        .method(Method::POST)
        .uri(&path)
        .header(SIGNATURE_HEADER, sig)
        .header(TIME_HEADER, time)
        .header(header::CONTENT_LENGTH, "10")
        .body(Body::from("hello"))
        .unwrap();
    let response = create_router(node.services.clone())
        .oneshot(request)
        .await
        .unwrap();
    let collected = response.into_body().collect().await.unwrap();
    let trailers = collected.trailers().cloned().unwrap_or_default();
    let status = trailers["finalstatus"].to_str().unwrap();
    assert!(status.contains("short read"));
}

// ============ Admin: bucket lifecycle ============

const LIFECYCLE_XML: &str = "<LifecycleConfiguration><Rule><ID>expire</ID>\
    <Status>Enabled</Status><Filter><Prefix>logs/</Prefix></Filter>\
    <Expiration><Days>30</Days></Expiration></Rule></LifecycleConfiguration>";

const TRANSITION_XML: &str = "<LifecycleConfiguration><Rule><ID>tier</ID>\
    <Status>Enabled</Status><Transition><Days>90</Days>\
    <StorageClass>S3:GLACIER_X</StorageClass></Transition></Rule>\
    </LifecycleConfiguration>";

fn admin_auth(method: &Method, path: &str) -> (HeaderValue, HeaderValue) {
    let now = chrono::Utc::now().to_rfc3339();
    let authorization = sign_admin_request(ADMIN_ACCESS, ADMIN_SECRET, method, path, &now);
    (
        HeaderValue::from_str(&authorization).unwrap(),
        HeaderValue::from_str(&now).unwrap(),
    )
}

#[tokio::test]
async fn put_lifecycle_without_md5_is_rejected() {
    let node = test_node();
    node.layer.add_bucket("mybucket");
    let server = test_server(&node);

    let (authorization, date) = admin_auth(&Method::PUT, "/mybucket");
    let response = server
        .put("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .text(LIFECYCLE_XML)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("MissingContentMD5"));

    // Metadata unchanged.
    assert!(node
        .services
        .bucket_metadata
        .lifecycle_config("mybucket")
        .await
        .is_none());
}

#[tokio::test]
async fn put_lifecycle_with_unregistered_transition_is_rejected() {
    let node = test_node();
    node.layer.add_bucket("mybucket");
    let server = test_server(&node);

    let md5 = BASE64.encode(Md5::digest(TRANSITION_XML.as_bytes()));
    let (authorization, date) = admin_auth(&Method::PUT, "/mybucket");
    let response = server
        .put("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .add_header(
            HeaderName::from_static("content-md5"),
            HeaderValue::from_str(&md5).unwrap(),
        )
        .text(TRANSITION_XML)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().contains("S3:GLACIER_X"));

    assert!(node
        .services
        .bucket_metadata
        .lifecycle_config("mybucket")
        .await
        .is_none());
}

#[tokio::test]
async fn lifecycle_put_get_delete_round_trip() {
    let node = test_node();
    node.layer.add_bucket("mybucket");
    node.services
        .bucket_targets
        .set_all(
            "mybucket",
            vec![BucketTarget {
                arn: "arn:opal:ilm:us-east-1:cold".to_string(),
                endpoint: "https://cold.example.com".to_string(),
                storage_class: "COLD".to_string(),
            }],
        )
        .await;
    let server = test_server(&node);

    let md5 = BASE64.encode(Md5::digest(LIFECYCLE_XML.as_bytes()));
    let (authorization, date) = admin_auth(&Method::PUT, "/mybucket");
    server
        .put("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .add_header(
            HeaderName::from_static("content-md5"),
            HeaderValue::from_str(&md5).unwrap(),
        )
        .text(LIFECYCLE_XML)
        .await
        .assert_status_ok();

    let (authorization, date) = admin_auth(&Method::GET, "/mybucket");
    let response = server
        .get("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .await;
    response.assert_status_ok();
    assert!(response.text().contains("expire"));

    let (authorization, date) = admin_auth(&Method::DELETE, "/mybucket");
    server
        .delete("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let (authorization, date) = admin_auth(&Method::GET, "/mybucket");
    let response = server
        .get("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert!(response.text().contains("NoSuchLifecycleConfiguration"));
}

#[tokio::test]
async fn missing_bucket_is_no_such_bucket() {
    let node = test_node();
    let server = test_server(&node);

    let md5 = BASE64.encode(Md5::digest(LIFECYCLE_XML.as_bytes()));
    let (authorization, date) = admin_auth(&Method::PUT, "/ghost");
    let response = server
        .put("/ghost")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .add_header(
            HeaderName::from_static("content-md5"),
            HeaderValue::from_str(&md5).unwrap(),
        )
        .text(LIFECYCLE_XML)
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert!(response.text().contains("NoSuchBucket"));
}

#[tokio::test]
async fn admin_auth_failure_is_access_denied_xml() {
    let node = test_node();
    node.layer.add_bucket("mybucket");
    let server = test_server(&node);

    let now = chrono::Utc::now().to_rfc3339();
    let authorization =
        sign_admin_request(ADMIN_ACCESS, "wrong-secret", &Method::GET, "/mybucket", &now);
    let response = server
        .get("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&authorization).unwrap(),
        )
        .add_header(
            HeaderName::from_static(ADMIN_DATE_HEADER),
            HeaderValue::from_str(&now).unwrap(),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(response.text().contains("AccessDenied"));
}

#[tokio::test]
async fn every_admin_request_emits_exactly_one_audit_entry() {
    let node = test_node();
    node.layer.add_bucket("mybucket");
    let server = test_server(&node);

    let (audit_tx, mut audit_rx) = mpsc::channel(16);
    let _handle = opal_core::Publisher::subscribe(&node.services.audit, audit_tx, |_| true);

    let (authorization, date) = admin_auth(&Method::PUT, "/mybucket");
    let response = server
        .put("/mybucket")
        .add_query_param("lifecycle", "")
        .add_header(header::AUTHORIZATION, authorization)
        .add_header(HeaderName::from_static(ADMIN_DATE_HEADER), date)
        .text(LIFECYCLE_XML)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let entry = tokio::time::timeout(Duration::from_secs(1), audit_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.version, "1");
    assert_eq!(entry.api.name, "PutBucketLifecycle");
    assert_eq!(entry.api.status_code, 400);
    assert!(entry.req_query.contains_key("lifecycle"));
    assert!(!entry.request_id.is_empty());
    assert!(audit_rx.try_recv().is_err(), "exactly one audit entry");
}
