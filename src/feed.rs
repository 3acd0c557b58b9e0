// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Server-Sent Events feed of capture summaries.
//!
//! Each open connection gets a worker task that pushes the full summary list
//! on connect and again after every store change. Pushes are level-triggered:
//! several mutations that land while the worker is busy may be reported as a
//! single push of the latest state.

use crate::capture::DashboardItem;
use crate::proxy::ServiceBody;
use crate::store::{CaptureStore, WaitOutcome};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Response, StatusCode, Version};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// SSE event name carrying the summary list.
pub const EVENT_NAME: &str = "captures";

// Pushes are full snapshots, so a short queue is enough.
const FEED_BUFFER: usize = 4;

/// Encode one `captures` event.
pub fn encode_event(items: &[DashboardItem]) -> Bytes {
    let data = serde_json::to_string(items).unwrap_or_else(|e| {
        warn!(%e, "failed to encode capture summaries");
        "[]".to_string()
    });
    Bytes::from(format!("event: {}\ndata: {}\n\n", EVENT_NAME, data))
}

/// Push loop for one observer. Returns when `cancel` fires, the receiving
/// side of `tx` is dropped, or the store goes away.
pub async fn run_feed(store: Arc<CaptureStore>, tx: mpsc::Sender<Bytes>, cancel: CancellationToken) {
    let mut watcher = store.subscribe();
    loop {
        // Mark before reading so a mutation racing the snapshot still wakes us.
        watcher.mark_seen();
        let event = encode_event(&store.dashboard_items());

        // A send that can complete wins over cancellation, so every observer
        // gets at least the initial list.
        tokio::select! {
            biased;
            res = tx.send(event) => {
                if res.is_err() {
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }

        tokio::select! {
            outcome = watcher.wait(&cancel) => {
                if outcome != WaitOutcome::Changed {
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
    debug!("feed worker stopped");
}

/// Start a feed worker and return the streaming response for it.
///
/// HTTP/1.0 has no way to deliver an open-ended body incrementally, so such
/// requests are refused with 505 and no worker is started.
pub fn open_feed(
    store: Arc<CaptureStore>,
    shutdown: &CancellationToken,
    version: Version,
) -> Response<ServiceBody> {
    if version < Version::HTTP_11 {
        warn!(?version, "live feed requires incremental streaming");
        return Response::builder()
            .status(StatusCode::HTTP_VERSION_NOT_SUPPORTED)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from_static(b"StreamingUnsupported")).boxed())
            .unwrap_or_else(|_| {
                Response::new(Full::new(Bytes::from_static(b"StreamingUnsupported")).boxed())
            });
    }

    let (tx, rx) = mpsc::channel::<Bytes>(FEED_BUFFER);
    tokio::spawn(run_feed(store, tx, shutdown.child_token()));
    debug!("feed worker started");

    let frames = ReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));
    Response::builder()
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(StreamBody::new(frames).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()).boxed()))
}
