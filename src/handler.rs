// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Buffered request handlers and the ordered decorator chain around them.
//!
//! Bodies travel as `Bytes`: the server reads the single-use network stream
//! once, and every layer (recorder, decorators, forwarder) works on cheap
//! clones of that one buffer.

use bytes::Bytes;
use hyper::header::HeaderName;
use hyper::{Request, Response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Response<Bytes>> + Send + 'a>>;

/// One stage of request processing. Always yields a response; failures are
/// expressed as responses, not errors.
pub trait Handler: Send + Sync {
    fn handle(&self, req: Request<Bytes>) -> HandlerFuture<'_>;
}

/// Constructor wrapping an inner handler in a decorator.
pub type Middleware = Box<dyn Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync>;

/// Compose `middlewares` around `core`, first entry outermost:
/// `[d1, d2]` yields `d1(d2(core))`.
pub fn build_chain(core: Arc<dyn Handler>, middlewares: &[Middleware]) -> Arc<dyn Handler> {
    middlewares
        .iter()
        .rev()
        .fold(core, |inner, wrap| wrap(inner))
}

/// Removes configured request headers before they reach the upstream.
pub struct SuppressHeaders {
    names: Vec<HeaderName>,
    inner: Arc<dyn Handler>,
}

impl SuppressHeaders {
    pub fn middleware(names: &[String]) -> Middleware {
        let parsed: Vec<HeaderName> = names
            .iter()
            .filter_map(|n| match HeaderName::from_bytes(n.trim().as_bytes()) {
                Ok(h) => Some(h),
                Err(e) => {
                    warn!(header = %n, %e, "ignoring invalid header name in suppress_headers");
                    None
                }
            })
            .collect();
        Box::new(move |inner: Arc<dyn Handler>| -> Arc<dyn Handler> {
            Arc::new(SuppressHeaders {
                names: parsed.clone(),
                inner,
            })
        })
    }
}

impl Handler for SuppressHeaders {
    fn handle(&self, mut req: Request<Bytes>) -> HandlerFuture<'_> {
        for name in &self.names {
            req.headers_mut().remove(name);
        }
        self.inner.handle(req)
    }
}
