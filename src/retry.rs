// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Replay of a stored capture through the live handler chain.

use crate::capture::Capture;
use crate::forward::failure_response;
use crate::handler::Handler;
use crate::store::CaptureStore;
use bytes::Bytes;
use hyper::{Method, Request, Response, Version};
use tracing::{info, warn};

/// Rebuild the original request from a capture.
///
/// The body is a new handle on the stored buffer, so the capture can be
/// replayed any number of times.
pub fn replay_request(capture: &Capture) -> anyhow::Result<Request<Bytes>> {
    let req = &capture.request;
    let method = Method::from_bytes(req.method.as_bytes())?;
    let mut builder = Request::builder()
        .method(method)
        .uri(req.path_and_query.as_str())
        .version(parse_http_version(&req.version));
    if let Some(headers) = builder.headers_mut() {
        *headers = req.headers.clone();
    }
    Ok(builder.body(req.body.clone())?)
}

fn parse_http_version(token: &str) -> Version {
    match token {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/2.0" => Version::HTTP_2,
        "HTTP/3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

/// Re-issue capture `id` through `chain`.
///
/// Returns `None` when no capture has that id. Otherwise the chain records a
/// new capture and its response is returned; the original is left untouched.
pub async fn retry(store: &CaptureStore, chain: &dyn Handler, id: u64) -> Option<Response<Bytes>> {
    let capture = store.find(id)?;
    info!(id, method = %capture.request.method, path = %capture.request.path, "replaying capture");
    let resp = match replay_request(&capture) {
        Ok(req) => chain.handle(req).await,
        Err(e) => {
            warn!(id, %e, "failed to rebuild captured request");
            failure_response(format!("replay build error: {}", e))
        }
    };
    Some(resp)
}
