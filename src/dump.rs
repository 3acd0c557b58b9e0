// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Human-readable dumps of a capture and the curl command that replays it.
//!
//! Everything here is pure: the capture is only read, and gzip bodies are
//! decoded into a fresh buffer for display while the stored bytes stay as
//! they were on the wire.

use crate::capture::Capture;
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use hyper::header::{HeaderMap, CONTENT_ENCODING};
use hyper::Uri;
use serde::Serialize;
use std::io::Read;

const CRLF: &str = "\r\n";

/// Rendered views of one capture, as served by the dashboard.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CaptureDump {
    pub request: String,
    pub response: String,
    pub curl: String,
    /// When the round trip finished, RFC 3339 in UTC.
    pub captured_at: DateTime<Utc>,
}

pub fn dump(capture: &Capture) -> CaptureDump {
    CaptureDump {
        request: dump_request(capture),
        response: dump_response(capture),
        curl: curl(capture),
        captured_at: capture.captured_at,
    }
}

/// Request line, sorted header lines, blank line, body.
pub fn dump_request(capture: &Capture) -> String {
    let req = &capture.request;
    let mut lines = header_lines(&req.headers);
    if let Some(authority) = req.url.parse::<Uri>().ok().and_then(|u| u.authority().cloned()) {
        lines.push(format!("Host: {}", authority));
    }
    lines.sort();

    let mut out = format!("{} {} {}{}", req.method, req.path_and_query, req.version, CRLF);
    push_head_and_body(&mut out, &lines, &req.headers, &req.body);
    out
}

/// Status line, sorted header lines, blank line, body.
///
/// A proxy failure has no upstream response to describe, so only the
/// captured error text is returned.
pub fn dump_response(capture: &Capture) -> String {
    let res = &capture.response;
    if res.is_proxy_failure() {
        return String::from_utf8_lossy(&res.body).into_owned();
    }
    let mut lines = header_lines(&res.headers);
    lines.sort();

    let mut out = format!("{} {}{}", res.version, res.status_line(), CRLF);
    push_head_and_body(&mut out, &lines, &res.headers, &res.body);
    out
}

/// A curl invocation replaying the captured request from its raw bytes.
pub fn curl(capture: &Capture) -> String {
    let req = &capture.request;
    let mut out = format!("curl -X {} {}", req.method, shell_word(&req.url));

    let mut names: Vec<_> = req
        .headers
        .keys()
        .map(|k| (canonical_header_name(k.as_str()), k))
        .collect();
    names.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, key) in names {
        let values: Vec<String> = req
            .headers
            .get_all(key)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        out.push_str(" \\\n  -H ");
        out.push_str(&shell_quote(&format!("{}: {}", name, values.join(" "))));
    }

    if !req.body.is_empty() {
        out.push_str(" \\\n  -d ");
        out.push_str(&shell_quote(&String::from_utf8_lossy(&req.body)));
    }
    out
}

fn push_head_and_body(out: &mut String, lines: &[String], headers: &HeaderMap, body: &[u8]) {
    for line in lines {
        out.push_str(line);
        out.push_str(CRLF);
    }
    out.push_str(CRLF);
    out.push_str(&display_body(headers, body));
}

fn header_lines(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| {
            format!(
                "{}: {}",
                canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes())
            )
        })
        .collect()
}

// Only the outermost coding is undone; anything beneath it stays as is.
fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONTENT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .last()
        .is_some_and(|token| token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip"))
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output)?;
    Ok(output)
}

// A body that fails to decode renders as a marker; the rest of the dump is unaffected.
fn display_body(headers: &HeaderMap, body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    if is_gzip(headers) {
        return match gunzip(body) {
            Ok(decoded) => String::from_utf8_lossy(&decoded).into_owned(),
            Err(e) => format!("<gzip decode error: {}>", e),
        };
    }
    String::from_utf8_lossy(body).into_owned()
}

/// `content-type` -> `Content-Type`, `x-api-key` -> `X-Api-Key`.
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// URLs are left bare unless they contain characters the shell would interpret.
fn shell_word(s: &str) -> String {
    let safe = s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-._~:/%+=@,".contains(c));
    if safe {
        s.to_string()
    } else {
        shell_quote(s)
    }
}
