// SPDX-FileCopyrightText: 2026 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use http_capture::config::Config;
use http_capture::proxy::{run_proxy, Shared};
use http_capture::store::CaptureStore;

pub struct RunningProxy {
    pub addr: SocketAddr,
    pub store: Arc<CaptureStore>,
    pub shutdown: CancellationToken,
    pub handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

// Start run_proxy against `target` and wait until it is accepting
pub async fn start_run_proxy_and_wait(mut cfg: Config, target: &str) -> anyhow::Result<RunningProxy> {
    // Choose a free port by binding then dropping
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    cfg.general.listen = addr.to_string();
    cfg.general.target = target.to_string();

    let store = Arc::new(CaptureStore::new(cfg.dashboard.max_captures));
    let shutdown = CancellationToken::new();
    let shared = Arc::new(Shared::from_config(
        &cfg,
        store.clone(),
        Vec::new(),
        shutdown.clone(),
    )?);
    let handle = tokio::spawn(run_proxy(addr, shared, shutdown.clone()));

    // Wait for server to accept connections
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() > deadline {
            return Err(anyhow::anyhow!("timeout waiting for proxy to start"));
        }
        if let Ok(mut s) = tokio::net::TcpStream::connect(addr).await {
            let _ = s.shutdown().await;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    Ok(RunningProxy {
        addr,
        store,
        shutdown,
        handle,
    })
}

pub fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

pub async fn send(
    method: &str,
    url: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> anyhow::Result<Response<Incoming>> {
    let mut builder = Request::builder().method(method).uri(url);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(Full::new(Bytes::from(body.to_string())))?;
    Ok(client().request(req).await?)
}

pub async fn get(url: &str) -> anyhow::Result<(u16, Bytes)> {
    let resp = send("GET", url, &[], "").await?;
    let status = resp.status().as_u16();
    let body = resp.into_body().collect().await?.to_bytes();
    Ok((status, body))
}
