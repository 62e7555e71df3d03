mod blacklist;
mod cache;
mod config;
mod connection;
mod console;
mod domain;
mod error;
mod proxy;
mod server;
mod tunnel;

use crate::config::{Cli, ProxyConfig};
use crate::proxy::ProxyContext;
use clap::Parser;
use color_eyre::eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often active connection counts are logged.
const STATUS_INTERVAL: Duration = Duration::from_secs(300);
/// How long shutdown waits for open connections.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fwdproxy=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    color_eyre::install()?;

    let args = Cli::parse();
    let config = ProxyConfig::from_cli(args)?;

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("HTTP Proxy listening on http://{}", listener.local_addr()?);

    let ctx = ProxyContext::new(config);
    match ctx.cache.ttl() {
        Some(ttl) => info!("Caching responses for {:?} ({:?} keys)", ttl, ctx.config.cache_key),
        None => info!("Caching responses without expiry ({:?} keys)", ctx.config.cache_key),
    }

    if ctx.config.console {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = console::run(&ctx, stdin, tokio::io::stdout()).await {
                warn!("Console stopped: {}", e);
            }
        });
    }

    tokio::spawn(server::monitor(Arc::clone(&ctx), STATUS_INTERVAL));

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        _ = server::serve(listener, Arc::clone(&ctx)) => {
            warn!("Server loop terminated");
        }
        _ = shutdown => {
            server::drain(&ctx, SHUTDOWN_GRACE).await;
            info!("Server shutdown complete");
        }
    }

    Ok(())
}
