// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use http_capture::{config, proxy, store};
use tracing::{error, info};

#[derive(Parser, Debug, Default)]
#[command(name = "http-capture")]
struct Args {
    /// Upstream base URL [default: https://jsonplaceholder.typicode.com]
    #[arg(long)]
    url: Option<String>,

    /// Port to listen on [default: 9000]
    #[arg(long)]
    port: Option<u16>,

    /// Path segment the dashboard is served under [default: dashboard]
    #[arg(long)]
    dashboard: Option<String>,

    /// Captures kept before the oldest is evicted [default: 16]
    #[arg(long)]
    max_captures: Option<usize>,

    /// Optional config TOML path; flags given on the command line win
    #[arg(long)]
    config: Option<String>,
}

impl Args {
    fn apply_to(&self, cfg: &mut config::Config) -> anyhow::Result<()> {
        if let Some(url) = &self.url {
            cfg.general.target = url.clone();
        }
        if let Some(port) = self.port {
            let mut addr = cfg.listen_addr()?;
            addr.set_port(port);
            cfg.general.listen = addr.to_string();
        }
        if let Some(name) = &self.dashboard {
            cfg.dashboard.name = name.clone();
        }
        if let Some(n) = self.max_captures {
            cfg.dashboard.max_captures = n;
        }
        Ok(())
    }
}

async fn load_config(args: &Args) -> anyhow::Result<config::Config> {
    let mut cfg = match &args.config {
        Some(p) => config::Config::load_from_path(p)
            .await
            .with_context(|| format!("failed to load config {}", p))?,
        None => config::Config::default(),
    };
    args.apply_to(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cfg = load_config(&args).await?;
    let addr = cfg.listen_addr()?;

    let store = Arc::new(store::CaptureStore::new(cfg.dashboard.max_captures));
    let max_captures = store.capacity();
    let shutdown = CancellationToken::new();
    let shared = Arc::new(proxy::Shared::from_config(
        &cfg,
        store,
        Vec::new(),
        shutdown.clone(),
    )?);
    info!(
        upstream = %cfg.general.target,
        max_captures,
        "forwarding to upstream"
    );

    let server = proxy::run_proxy(addr, shared, shutdown.clone());
    tokio::pin!(server);

    tokio::select! {
        res = &mut server => {
            if let Err(e) = res {
                error!(%e, "server error");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
            shutdown.cancel();
            if let Err(e) = server.await {
                error!(%e, "server error");
            }
        }
    }

    Ok(())
}
