// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use crate::capture::{Capture, RequestSnapshot, ResponseSnapshot};
use crate::handler::{Handler, HandlerFuture};
use bytes::Bytes;
use hyper::{HeaderMap, Request, Response};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Build a capture for `method path` against http://upstream.test with a 200 response.
pub fn make_test_capture(method: &str, path: &str) -> Capture {
    let request = RequestSnapshot {
        method: method.to_string(),
        url: format!("http://upstream.test{}", path),
        path: path.to_string(),
        path_and_query: path.to_string(),
        version: "HTTP/1.1".into(),
        headers: HeaderMap::new(),
        body: Bytes::new(),
    };
    let response = ResponseSnapshot {
        version: "HTTP/1.1".into(),
        status: 200,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    };
    Capture::new(request, response, 0)
}

/// Build a header map from `(name, value)` pairs, appending repeated names.
pub fn make_headers_from_pairs(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut hm = HeaderMap::new();
    for (k, v) in pairs {
        let name = hyper::header::HeaderName::from_bytes(k.as_bytes()).expect("valid header name");
        hm.append(name, v.parse().expect("valid header value"));
    }
    hm
}

/// Gzip-compress a string for content-encoding tests.
pub fn gzip_bytes(s: &str) -> Bytes {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(s.as_bytes()).expect("gzip write");
    Bytes::from(encoder.finish().expect("gzip finish"))
}

/// Downstream stand-in that echoes the request body back with a 200 and counts calls.
#[derive(Default)]
pub struct EchoHandler {
    pub calls: AtomicUsize,
}

impl Handler for EchoHandler {
    fn handle(&self, req: Request<Bytes>) -> HandlerFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let mut builder = Response::builder()
                .status(200)
                .header("x-echo-method", parts.method.as_str())
                .header("x-echo-uri", parts.uri.to_string());
            if let Some(ct) = parts.headers.get(hyper::header::CONTENT_TYPE) {
                builder = builder.header(hyper::header::CONTENT_TYPE, ct);
            }
            builder.body(body).expect("valid echo response")
        })
    }
}
