// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Routes mounted under the dashboard prefix.

use crate::dump::dump;
use crate::feed::open_feed;
use crate::handler::Handler;
use crate::proxy::{into_service_response, ServiceBody};
use crate::retry::retry;
use crate::store::CaptureStore;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode, Version};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PAGE_TEMPLATE: &str = include_str!("dashboard.html");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Page,
    Feed,
    Clear,
    Item(u64),
    Retry(u64),
    NotFound,
}

impl Route {
    // clear and retry have side effects, so they stay off HEAD.
    fn has_side_effects(self) -> bool {
        matches!(self, Route::Clear | Route::Retry(_))
    }

    fn allows(self, method: &Method) -> bool {
        *method == Method::GET || (*method == Method::HEAD && !self.has_side_effects())
    }

    fn allow_header(self) -> &'static str {
        if self.has_side_effects() {
            "GET"
        } else {
            "GET, HEAD"
        }
    }
}

pub struct Dashboard {
    prefix: String,
    page: String,
    store: Arc<CaptureStore>,
    chain: Arc<dyn Handler>,
    shutdown: CancellationToken,
}

impl Dashboard {
    /// `prefix` is the mount point, e.g. `/dashboard`. `chain` is the same
    /// handler chain live traffic goes through; retries re-enter it.
    pub fn new(
        prefix: String,
        target_url: &str,
        store: Arc<CaptureStore>,
        chain: Arc<dyn Handler>,
        shutdown: CancellationToken,
    ) -> Self {
        let page = PAGE_TEMPLATE
            .replace("{{DASHBOARD_JS}}", &escape_js_string(&prefix))
            .replace("{{TARGET}}", &escape_html(target_url));
        Self {
            prefix,
            page,
            store,
            chain,
            shutdown,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether `path` belongs to the dashboard rather than the upstream.
    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn route(&self, path: &str) -> Route {
        let rest = match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.trim_start_matches('/'),
            None => return Route::NotFound,
        };
        match rest {
            "" => return Route::Page,
            "conn" | "conn/" => return Route::Feed,
            "clear" | "clear/" => return Route::Clear,
            _ => {}
        }
        let parse_id = |s: &str| s.trim_end_matches('/').parse::<u64>().ok();
        if let Some(id) = rest.strip_prefix("items/").and_then(parse_id) {
            return Route::Item(id);
        }
        if let Some(id) = rest.strip_prefix("retry/").and_then(parse_id) {
            return Route::Retry(id);
        }
        Route::NotFound
    }

    pub async fn handle(&self, method: &Method, path: &str, version: Version) -> Response<ServiceBody> {
        let route = self.route(path);
        if route != Route::NotFound && !route.allows(method) {
            return Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .header(ALLOW, route.allow_header())
                .body(full(Bytes::new()))
                .unwrap_or_else(|_| Response::new(full(Bytes::new())));
        }

        match route {
            Route::Page => respond(
                StatusCode::OK,
                "text/html; charset=utf-8",
                Bytes::from(self.page.clone()),
            ),
            Route::Feed => open_feed(self.store.clone(), &self.shutdown, version),
            Route::Clear => {
                self.store.remove_all();
                info!("captures cleared");
                respond(StatusCode::OK, "text/plain; charset=utf-8", Bytes::new())
            }
            Route::Item(id) => match self.store.find(id) {
                Some(capture) => match serde_json::to_vec(&dump(&capture)) {
                    Ok(json) => respond(StatusCode::OK, "application/json", Bytes::from(json)),
                    Err(e) => {
                        error!(id, %e, "failed to encode capture dump");
                        respond(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "text/plain; charset=utf-8",
                            Bytes::from("dump encode error"),
                        )
                    }
                },
                None => not_found(),
            },
            Route::Retry(id) => match retry(&self.store, self.chain.as_ref(), id).await {
                Some(resp) => into_service_response(resp),
                None => not_found(),
            },
            Route::NotFound => not_found(),
        }
    }
}

fn full(body: Bytes) -> ServiceBody {
    Full::new(body).boxed()
}

fn respond(status: StatusCode, content_type: &str, body: Bytes) -> Response<ServiceBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .header(CACHE_CONTROL, "no-cache")
        .body(full(body))
        .unwrap_or_else(|e| {
            error!(%e, "failed to build dashboard response");
            Response::new(full(Bytes::new()))
        })
}

fn not_found() -> Response<ServiceBody> {
    respond(
        StatusCode::NOT_FOUND,
        "text/plain; charset=utf-8",
        Bytes::from_static(b"not found"),
    )
}

// JSON string literals are valid JS; `<` is escaped so the value cannot end the script element.
fn escape_js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
