// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! HTTP server: accept loop, dashboard dispatch and the recorded proxy chain.

use crate::config::Config;
use crate::dashboard::Dashboard;
use crate::forward::Forwarder;
use crate::handler::{build_chain, Handler, Middleware, SuppressHeaders};
use crate::recorder::Recorder;
use crate::store::CaptureStore;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::{service::service_fn, Request, Response, StatusCode, Version};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Body type of every response the server writes.
pub type ServiceBody = BoxBody<Bytes, Infallible>;

type ServiceFuture = Pin<Box<dyn Future<Output = Result<Response<ServiceBody>, Infallible>> + Send>>;

/// State shared by all connections.
pub struct Shared {
    chain: Arc<dyn Handler>,
    dashboard: Dashboard,
}

impl Shared {
    pub fn new(chain: Arc<dyn Handler>, dashboard: Dashboard) -> Self {
        Self { chain, dashboard }
    }

    /// Wire the full chain from configuration.
    ///
    /// The Recorder is outermost, followed by the configured header
    /// suppression, then `middlewares` in order, then the forwarder.
    pub fn from_config(
        cfg: &Config,
        store: Arc<CaptureStore>,
        middlewares: Vec<Middleware>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let target = cfg.target()?;
        let forwarder: Arc<dyn Handler> =
            Arc::new(Forwarder::new(target.clone(), cfg.upstream_timeout()));

        let mut decorators = Vec::with_capacity(middlewares.len() + 1);
        if !cfg.proxy.suppress_headers.is_empty() {
            decorators.push(SuppressHeaders::middleware(&cfg.proxy.suppress_headers));
        }
        decorators.extend(middlewares);

        let inner = build_chain(forwarder, &decorators);
        let chain: Arc<dyn Handler> = Arc::new(Recorder::new(store.clone(), target, inner));
        let dashboard = Dashboard::new(
            cfg.dashboard_prefix(),
            &cfg.general.target,
            store,
            chain.clone(),
            shutdown,
        );
        Ok(Self::new(chain, dashboard))
    }
}

/// Bind `listen` and serve until `shutdown` fires. A bind failure is returned.
pub async fn run_proxy(
    listen: SocketAddr,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    serve(listener, shared, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listen = listener.local_addr()?;
    info!(%listen, dashboard = shared.dashboard.prefix(), "listening");

    let server_builder = AutoConnBuilder::new(TokioExecutor::new());

    loop {
        let (stream, remote_addr) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(%e, "accept error");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let shared = shared.clone();
        let builder_clone = server_builder.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let shared = shared.clone();
                let fut: ServiceFuture =
                    Box::pin(async move { handle_request(req, shared, remote_addr).await });
                fut
            });

            let io = TokioIo::new(stream);
            if let Err(e) = builder_clone.serve_connection(io, service).await {
                error!(%e, %remote_addr, "connection error");
            }
        });
    }

    info!(%listen, "stopped accepting connections");
    Ok(())
}

async fn handle_request<B>(
    req: Request<B>,
    shared: Arc<Shared>,
    remote_addr: SocketAddr,
) -> Result<Response<ServiceBody>, Infallible>
where
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if shared.dashboard.matches(req.uri().path()) {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let version = req.version();
        drop(req);
        return Ok(shared.dashboard.handle(&method, &path, version).await);
    }

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let boxed: Box<dyn std::error::Error + Send + Sync> = e.into();
            warn!(%remote_addr, error = %boxed, "failed to read request body");
            return Ok(Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Full::new(Bytes::from("request body read error")).boxed())
                .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()).boxed())));
        }
    };

    debug!(%remote_addr, method = %parts.method, uri = %parts.uri, "proxying");
    let resp = shared.chain.handle(Request::from_parts(parts, body)).await;
    Ok(into_service_response(resp))
}

/// Hand a buffered chain response to the connection. The version is reset so
/// the server writes whatever its own connection speaks.
pub fn into_service_response(resp: Response<Bytes>) -> Response<ServiceBody> {
    let (mut parts, body) = resp.into_parts();
    parts.version = Version::default();
    Response::from_parts(parts, Full::new(body).boxed())
}
