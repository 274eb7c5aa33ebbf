//! Long-lived streaming response frames
//!
//! A stream handler subscribes to a publisher, answers `200 OK` immediately
//! and then writes one encoded envelope per event. Every 500 ms without an
//! event a zero-valued envelope of the same type goes out instead; it keeps
//! intermediaries from timing the connection out and doubles as the
//! disconnect detector, because the next write after the peer goes away
//! fails and ends the loop. Ending the loop drops the subscription handle,
//! which deregisters the subscriber.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use http_body::Frame;
use http_body_util::StreamBody;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use opal_core::pubsub::SubscriptionHandle;
use opal_core::CodecError;

/// Cadence of zero-valued keep-alive envelopes.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// Trailer carrying the outcome of the net probe.
pub const FINAL_STATUS_TRAILER: &str = "finalstatus";

fn octet_stream_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .expect("static response parts")
}

/// Streams events from a subscription until the peer disconnects. Encoded
/// envelopes are self-delimiting, so they are written back to back.
pub fn streaming_response<T, F>(
    mut rx: mpsc::Receiver<T>,
    handle: SubscriptionHandle<T>,
    keep_alive: T,
    encode: F,
) -> Response
where
    T: Send + 'static,
    F: Fn(&T) -> Result<Vec<u8>, CodecError> + Send + 'static,
{
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, io::Error>>(16);
    tokio::spawn(async move {
        // Keep the subscription alive for exactly as long as this loop runs.
        let _handle = handle;
        let mut ticker = interval(KEEP_ALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let Ok(frame) = encode(&event) else { break };
                    if body_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        break;
                    }
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    let Ok(frame) = encode(&keep_alive) else { break };
                    if body_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    octet_stream_response(Body::from_stream(ReceiverStream::new(body_rx)))
}

/// Streams items until the feeding channel closes, with no keep-alive. Used
/// where the producer is finite, e.g. the peer metrics generators.
pub fn finite_stream<T, F>(mut rx: mpsc::Receiver<T>, encode: F) -> Response
where
    T: Send + 'static,
    F: Fn(&T) -> Result<Vec<u8>, CodecError> + Send + 'static,
{
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, io::Error>>(16);
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            let Ok(frame) = encode(&item) else { break };
            if body_tx.send(Ok(Bytes::from(frame))).await.is_err() {
                break;
            }
        }
    });
    octet_stream_response(Body::from_stream(ReceiverStream::new(body_rx)))
}

/// Runs a slow operation while periodically writing whitespace on the wire,
/// then emits the encoded payload. Readers skip leading whitespace before
/// decoding. Failures after the header is out are not reported; the stream
/// just ends.
pub fn with_keep_alive<F>(operation: F) -> Response
where
    F: Future<Output = Result<Vec<u8>, crate::error::PeerError>> + Send + 'static,
{
    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, io::Error>>(16);
    tokio::spawn(async move {
        tokio::pin!(operation);
        let mut ticker = interval(KEEP_ALIVE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                result = &mut operation => {
                    if let Ok(payload) = result {
                        let _ = body_tx.send(Ok(Bytes::from(payload))).await;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if body_tx.send(Ok(Bytes::from_static(b" "))).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    octet_stream_response(Body::from_stream(ReceiverStream::new(body_rx)))
}

/// Empty-bodied response that reports `final_status` in the `FinalStatus`
/// trailer. The trailer is announced in the `Trailer` header before any body
/// bytes go out.
pub fn trailer_response(final_status: &str) -> Response {
    let mut trailers = HeaderMap::new();
    let value = HeaderValue::from_str(final_status)
        .unwrap_or_else(|_| HeaderValue::from_static("error"));
    trailers.insert(HeaderName::from_static(FINAL_STATUS_TRAILER), value);

    let stream =
        futures::stream::once(async move { Ok::<_, Infallible>(Frame::trailers(trailers)) });
    Response::builder()
        .status(StatusCode::OK)
        .header("trailer", "FinalStatus")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::new(StreamBody::new(stream)))
        .expect("static response parts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use opal_core::{Codec, GeneralCodec, Publisher};
    use std::sync::Arc;

    #[tokio::test]
    async fn stream_emits_events_and_keep_alives() {
        let publisher: Arc<Publisher<u32>> = Arc::new(Publisher::new());
        let (tx, rx) = mpsc::channel(opal_core::SUBSCRIBER_BUFFER);
        let handle = Publisher::subscribe(&publisher, tx, |_| true);
        let response = streaming_response(rx, handle, 0u32, |v| GeneralCodec.encode(v));
        assert_eq!(response.status(), StatusCode::OK);

        publisher.publish(&7);
        let mut body = response.into_body().into_data_stream();
        let first = tokio_stream::StreamExt::next(&mut body).await.unwrap().unwrap();
        let decoded: u32 = GeneralCodec.decode(&first).unwrap();
        assert_eq!(decoded, 7);

        // No events: the next frame is the zero envelope after ~500 ms.
        let second = tokio_stream::StreamExt::next(&mut body).await.unwrap().unwrap();
        let decoded: u32 = GeneralCodec.decode(&second).unwrap();
        assert_eq!(decoded, 0);
    }

    #[tokio::test]
    async fn dropping_body_deregisters_subscription() {
        let publisher: Arc<Publisher<u32>> = Arc::new(Publisher::new());
        let (tx, rx) = mpsc::channel(opal_core::SUBSCRIBER_BUFFER);
        let handle = Publisher::subscribe(&publisher, tx, |_| true);
        let response = streaming_response(rx, handle, 0u32, |v| GeneralCodec.encode(v));
        assert_eq!(publisher.num_subscribers(), 1);

        drop(response);
        // The writer task notices on its next tick and drops the handle.
        tokio::time::sleep(KEEP_ALIVE_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(publisher.num_subscribers(), 0);
    }

    #[tokio::test]
    async fn trailer_body_carries_final_status() {
        let response = trailer_response("Success");
        assert_eq!(response.headers()["trailer"], "FinalStatus");

        let collected = response.into_body().collect().await.unwrap();
        let trailers = collected.trailers().cloned().unwrap_or_default();
        assert_eq!(trailers[FINAL_STATUS_TRAILER], "Success");
    }
}
