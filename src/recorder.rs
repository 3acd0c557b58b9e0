// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Outermost handler: times each round trip and stores it as a capture.

use crate::capture::{format_http_version, Capture, RequestSnapshot, ResponseSnapshot};
use crate::forward::{failure_response, Target};
use crate::handler::{Handler, HandlerFuture};
use crate::store::CaptureStore;
use bytes::Bytes;
use hyper::header::HOST;
use hyper::{Request, Response};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Recorder {
    store: Arc<CaptureStore>,
    target: Target,
    inner: Arc<dyn Handler>,
}

impl Recorder {
    pub fn new(store: Arc<CaptureStore>, target: Target, inner: Arc<dyn Handler>) -> Self {
        Self {
            store,
            target,
            inner,
        }
    }
}

// Runs on its own task, so it owns everything it touches.
async fn record(
    store: Arc<CaptureStore>,
    target: Target,
    inner: Arc<dyn Handler>,
    req: Request<Bytes>,
) -> Response<Bytes> {
    let started = Instant::now();

    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let mut headers = parts.headers.clone();
    headers.remove(HOST);
    let request = RequestSnapshot {
        method: parts.method.to_string(),
        url: target.url_for(&path_and_query),
        path: parts.uri.path().to_string(),
        path_and_query,
        version: format_http_version(parts.version),
        headers,
        // Shares the buffer; the downstream gets its own handle below.
        body: body.clone(),
    };

    let resp = inner.handle(Request::from_parts(parts, body)).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let response = ResponseSnapshot {
        version: format_http_version(resp.version()),
        status: resp.status().as_u16(),
        headers: resp.headers().clone(),
        body: resp.body().clone(),
    };
    let method = request.method.clone();
    let path = request.path.clone();
    let status = response.status;
    let id = store.insert(Capture::new(request, response, elapsed_ms));
    info!(id, %method, %path, status, elapsed_ms, "captured");

    resp
}

impl Handler for Recorder {
    // The round trip is detached from the caller: a client that hangs up
    // early still leaves a capture of what the upstream answered.
    fn handle(&self, req: Request<Bytes>) -> HandlerFuture<'_> {
        let task = tokio::spawn(record(
            self.store.clone(),
            self.target.clone(),
            self.inner.clone(),
            req,
        ));
        Box::pin(async move {
            match task.await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(%e, "capture task failed");
                    failure_response(format!("capture task failed: {}", e))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SENTINEL_STATUS;
    use crate::test_helpers::EchoHandler;
    use std::time::Duration;

    fn make_recorder(store: Arc<CaptureStore>, inner: Arc<dyn Handler>) -> anyhow::Result<Recorder> {
        Ok(Recorder::new(store, Target::parse("http://upstream.test/base")?, inner))
    }

    fn post(uri: &str, body: &'static str) -> Request<Bytes> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("host", "localhost:9000")
            .header("content-type", "text/plain")
            .body(Bytes::from_static(body.as_bytes()))
            .expect("valid request")
    }

    struct Slow(Duration);

    impl Handler for Slow {
        fn handle(&self, _req: Request<Bytes>) -> HandlerFuture<'_> {
            let d = self.0;
            Box::pin(async move {
                tokio::time::sleep(d).await;
                Response::new(Bytes::from_static(b"late"))
            })
        }
    }

    struct Failing;

    impl Handler for Failing {
        fn handle(&self, _req: Request<Bytes>) -> HandlerFuture<'_> {
            Box::pin(async { failure_response("upstream error: refused".into()) })
        }
    }

    #[tokio::test]
    async fn records_request_and_relays_identical_response() -> anyhow::Result<()> {
        let store = Arc::new(CaptureStore::new(8));
        let echo = Arc::new(EchoHandler::default());
        let recorder = make_recorder(store.clone(), echo.clone())?;

        let resp = recorder.handle(post("/things?x=1", "hello")).await;
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.body().as_ref(), b"hello");

        let items = store.snapshot();
        assert_eq!(items.len(), 1);
        let c = &items[0];
        assert_eq!(c.id, 1);
        assert_eq!(c.request.method, "POST");
        assert_eq!(c.request.path, "/things");
        assert_eq!(c.request.path_and_query, "/things?x=1");
        assert_eq!(c.request.url, "http://upstream.test/base/things?x=1");
        assert_eq!(c.request.body.as_ref(), b"hello");
        assert!(c.request.headers.get("host").is_none());
        assert_eq!(
            c.request.headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );

        assert_eq!(c.response.status, resp.status().as_u16());
        assert_eq!(&c.response.headers, resp.headers());
        assert_eq!(c.response.body, *resp.body());
        assert_eq!(echo.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn downstream_sees_the_full_body() -> anyhow::Result<()> {
        let store = Arc::new(CaptureStore::new(8));
        let recorder = make_recorder(store.clone(), Arc::new(EchoHandler::default()))?;

        let resp = recorder.handle(post("/", "a longer body than usual")).await;
        assert_eq!(resp.body().as_ref(), b"a longer body than usual");
        assert_eq!(
            store.find(1).map(|c| c.request.body),
            Some(Bytes::from_static(b"a longer body than usual"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn elapsed_is_measured_in_whole_milliseconds() -> anyhow::Result<()> {
        let store = Arc::new(CaptureStore::new(8));
        let recorder = make_recorder(store.clone(), Arc::new(Slow(Duration::from_millis(30))))?;

        recorder.handle(post("/", "")).await;
        let c = store.find(1).expect("captured");
        assert!(c.elapsed_ms >= 30, "elapsed was {}", c.elapsed_ms);
        assert!(c.elapsed_ms < 5_000);
        Ok(())
    }

    #[tokio::test]
    async fn forwarding_failure_is_recorded_not_swallowed() -> anyhow::Result<()> {
        let store = Arc::new(CaptureStore::new(8));
        let recorder = make_recorder(store.clone(), Arc::new(Failing))?;

        let resp = recorder.handle(post("/", "")).await;
        assert_eq!(resp.status().as_u16(), SENTINEL_STATUS);

        let c = store.find(1).expect("captured");
        assert_eq!(c.response.status, SENTINEL_STATUS);
        assert_eq!(c.response.body.as_ref(), b"upstream error: refused");
        Ok(())
    }

    #[tokio::test]
    async fn capture_is_kept_when_caller_gives_up() -> anyhow::Result<()> {
        let store = Arc::new(CaptureStore::new(8));
        let recorder = make_recorder(store.clone(), Arc::new(Slow(Duration::from_millis(200))))?;

        let early = tokio::time::timeout(Duration::from_millis(20), recorder.handle(post("/slow", ""))).await;
        assert!(early.is_err());
        assert!(store.is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let c = store.find(1).expect("captured after the caller left");
        assert_eq!(c.request.path, "/slow");
        assert_eq!(c.response.body.as_ref(), b"late");
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_requests_get_gapless_ids() -> anyhow::Result<()> {
        let k = 64;
        let store = Arc::new(CaptureStore::new(k));
        let recorder = Arc::new(make_recorder(
            store.clone(),
            Arc::new(Slow(Duration::from_millis(5))),
        )?);

        let tasks: Vec<_> = (0..k)
            .map(|_| {
                let recorder = recorder.clone();
                tokio::spawn(async move { recorder.handle(post("/", "x")).await })
            })
            .collect();
        for t in tasks {
            t.await?;
        }

        let mut ids: Vec<u64> = store.snapshot().iter().map(|c| c.id).collect();
        // insertion order already follows id order
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        ids.sort_unstable();
        assert_eq!(ids, (1..=k as u64).collect::<Vec<_>>());
        Ok(())
    }
}
