// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Recorded request/response pairs and the summaries derived from them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::Serialize;

/// Status code recorded when the proxy itself failed to produce an upstream
/// response. Real upstream statuses live in 100..=599, so this never collides.
pub const SENTINEL_STATUS: u16 = 999;

/// Request portion of a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSnapshot {
    pub method: String,
    /// Absolute upstream URL the request was forwarded to.
    pub url: String,
    pub path: String,
    /// Request-target as the client sent it, e.g. "/users?id=1".
    pub path_and_query: String,
    /// The HTTP-version token from the request line, e.g. "HTTP/1.1".
    pub version: String,
    /// Client headers minus `Host`; the upstream authority lives in `url`.
    pub headers: HeaderMap,
    /// Raw body bytes exactly as received from the client.
    pub body: Bytes,
}

/// Response portion of a capture.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSnapshot {
    pub version: String,
    pub status: u16,
    pub headers: HeaderMap,
    /// Raw body bytes exactly as relayed to the client (possibly compressed).
    pub body: Bytes,
}

impl ResponseSnapshot {
    /// The status line without the protocol, e.g. "200 OK" or "999 Proxy Failure".
    pub fn status_line(&self) -> String {
        if self.status == SENTINEL_STATUS {
            return format!("{} Proxy Failure", SENTINEL_STATUS);
        }
        let reason = hyper::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason());
        match reason {
            Some(r) => format!("{} {}", self.status, r),
            None => self.status.to_string(),
        }
    }

    pub fn is_proxy_failure(&self) -> bool {
        self.status == SENTINEL_STATUS
    }
}

/// One recorded round trip. Never mutated after it enters the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Assigned by the store on insert; zero until then.
    pub id: u64,
    pub captured_at: DateTime<Utc>,
    pub request: RequestSnapshot,
    pub response: ResponseSnapshot,
    pub elapsed_ms: u64,
}

impl Capture {
    pub fn new(request: RequestSnapshot, response: ResponseSnapshot, elapsed_ms: u64) -> Self {
        Self {
            id: 0,
            captured_at: Utc::now(),
            request,
            response,
            elapsed_ms,
        }
    }

    pub fn to_item(&self) -> DashboardItem {
        DashboardItem {
            id: self.id,
            path: self.request.path.clone(),
            method: self.request.method.clone(),
            status: self.response.status,
            elapsed: self.elapsed_ms,
        }
    }
}

/// Summary row pushed to dashboard observers.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DashboardItem {
    pub id: u64,
    pub path: String,
    pub method: String,
    pub status: u16,
    /// Round trip duration in milliseconds.
    pub elapsed: u64,
}

// Convert hyper::Version into the textual HTTP-version token used in start/status lines.
pub fn format_http_version(v: hyper::Version) -> String {
    match v {
        hyper::Version::HTTP_09 => "HTTP/0.9".to_string(),
        hyper::Version::HTTP_10 => "HTTP/1.0".to_string(),
        hyper::Version::HTTP_11 => "HTTP/1.1".to_string(),
        hyper::Version::HTTP_2 => "HTTP/2.0".to_string(),
        hyper::Version::HTTP_3 => "HTTP/3.0".to_string(),
        _ => "HTTP/1.1".to_string(),
    }
}
