// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Relay of buffered requests to the single upstream target.
//!
//! Every outcome is a response: when the upstream cannot be reached, times
//! out, or sends an unreadable body, the forwarder answers with
//! [`SENTINEL_STATUS`] and the error text so the failure is recorded like
//! any other round trip.

use crate::capture::SENTINEL_STATUS;
use crate::handler::{Handler, HandlerFuture};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, CONTENT_TYPE, HOST};
use hyper::{Request, Response, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

// RFC 7230 Section 6.1: Hop-by-hop headers must not be forwarded by proxies.
static HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

type HttpsClient = LegacyClient<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// The upstream base URL every request is rewritten onto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    scheme: String,
    authority: String,
    base_path: String,
    base_query: Option<String>,
}

impl Target {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        let uri: Uri = url.parse()?;
        let scheme = match uri.scheme_str() {
            Some(s @ ("http" | "https")) => s.to_string(),
            Some(other) => anyhow::bail!("unsupported target scheme: {}", other),
            None => anyhow::bail!("target url must be absolute: {}", url),
        };
        let authority = uri
            .authority()
            .ok_or_else(|| anyhow::anyhow!("target url has no host: {}", url))?
            .to_string();
        Ok(Self {
            scheme,
            authority,
            base_path: uri.path().to_string(),
            base_query: uri.query().filter(|q| !q.is_empty()).map(str::to_string),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Absolute upstream URL for an inbound request-target such as `/a?b=1`.
    pub fn url_for(&self, path_and_query: &str) -> String {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path_and_query, None),
        };
        let query = match (self.base_query.as_deref(), query.filter(|q| !q.is_empty())) {
            (Some(b), Some(q)) => format!("?{}&{}", b, q),
            (Some(b), None) => format!("?{}", b),
            (None, Some(q)) => format!("?{}", q),
            (None, None) => String::new(),
        };
        format!(
            "{}://{}{}{}",
            self.scheme,
            self.authority,
            join_paths(&self.base_path, path),
            query
        )
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// Innermost handler: sends the request upstream and buffers the answer.
pub struct Forwarder {
    client: HttpsClient,
    target: Target,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(target: Target, timeout: Duration) -> Self {
        let roots = match HttpsConnectorBuilder::new().with_native_roots() {
            Ok(b) => b,
            Err(e) => {
                warn!(%e, "native root certificates unavailable, using bundled roots");
                HttpsConnectorBuilder::new().with_webpki_roots()
            }
        };
        let https = roots
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();
        let client: HttpsClient = LegacyClient::builder(TokioExecutor::new()).build(https);
        Self {
            client,
            target,
            timeout,
        }
    }

    async fn forward(&self, req: Request<Bytes>) -> Result<Response<Bytes>, String> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.target.url_for(path_and_query);

        let mut builder = Request::builder().method(parts.method).uri(&url);
        if let Some(headers) = builder.headers_mut() {
            *headers = strip_hop_by_hop(&parts.headers);
            headers.remove(HOST);
        }
        let upstream_req = builder
            .body(Full::new(body))
            .map_err(|e| format!("request build error: {}", e))?;

        let round_trip = async {
            let resp = self
                .client
                .request(upstream_req)
                .await
                .map_err(|e| format!("upstream error: {}", e))?;
            let (parts, body) = resp.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| format!("upstream body collect error: {}", e))?
                .to_bytes();
            Ok::<_, String>((parts, bytes))
        };

        let (parts, bytes) = tokio::time::timeout(self.timeout, round_trip)
            .await
            .map_err(|_| {
                format!(
                    "upstream timeout: no response from {} within {}ms",
                    self.target.authority(),
                    self.timeout.as_millis()
                )
            })??;

        let mut resp = Response::new(bytes);
        *resp.status_mut() = parts.status;
        *resp.version_mut() = parts.version;
        *resp.headers_mut() = strip_hop_by_hop(&parts.headers);
        Ok(resp)
    }
}

impl Handler for Forwarder {
    fn handle(&self, req: Request<Bytes>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            match self.forward(req).await {
                Ok(resp) => resp,
                Err(message) => {
                    warn!(%method, %path, error = %message, "forwarding failed");
                    failure_response(message)
                }
            }
        })
    }
}

/// A sentinel-coded response carrying `message` as its body.
pub fn failure_response(message: String) -> Response<Bytes> {
    let mut resp = Response::new(Bytes::from(message));
    if let Ok(status) = hyper::StatusCode::from_u16(SENTINEL_STATUS) {
        *resp.status_mut() = status;
    }
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let connection_hop_headers = parse_connection_tokens(headers.get(CONNECTION));
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name.as_str(), &connection_hop_headers) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

// Parse a Connection header value into a lowercased set of tokens
fn parse_connection_tokens(val: Option<&HeaderValue>) -> HashSet<String> {
    let mut set = HashSet::new();
    if let Some(conn_str) = val.and_then(|v| v.to_str().ok()) {
        for token in conn_str.split(',') {
            let trimmed = token.trim().to_ascii_lowercase();
            if !trimmed.is_empty() {
                set.insert(trimmed);
            }
        }
    }
    set
}

fn is_hop_by_hop_header(name: &str, connection_hop_headers: &HashSet<String>) -> bool {
    connection_hop_headers.contains(name) || HOP_BY_HOP_HEADERS.contains(&name)
}
