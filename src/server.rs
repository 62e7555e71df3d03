use crate::proxy::{proxy, ProxyContext};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, ctx: Arc<ProxyContext>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept error: {} (continuing)", e);
                continue;
            }
        };

        let Some(guard) = ctx.connections.try_acquire() else {
            warn!(
                "Connection limit reached ({}), rejecting {}",
                ctx.connections.limit(),
                peer_addr
            );
            drop(stream);
            continue;
        };

        let ctx = Arc::clone(&ctx);
        tokio::task::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| proxy(req, Arc::clone(&ctx)));

            if let Err(err) = http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(io, service)
                .with_upgrades()
                .await
            {
                debug!("Connection from {} error: {:?}", peer_addr, err);
            }
            drop(guard);
        });
    }
}

/// Periodically log connection and tunnel counts while anything is active.
pub async fn monitor(ctx: Arc<ProxyContext>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut last = (0, 0);

    loop {
        interval.tick().await;

        let now = (ctx.connections.active(), ctx.tunnels.active());
        if now != last && now != (0, 0) {
            info!(
                "Status - active connections: {}, open tunnels: {}",
                now.0, now.1
            );
        }
        last = now;
    }
}

/// Wait up to `grace` for active connections and tunnels to finish.
pub async fn drain(ctx: &ProxyContext, grace: Duration) {
    let active = ctx.connections.active() + ctx.tunnels.active();
    if active == 0 {
        return;
    }
    info!("Waiting for {} connections to close...", active);

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if ctx.connections.active() + ctx.tunnels.active() == 0 {
            info!("All connections closed gracefully");
            return;
        }
    }

    warn!(
        "Forced shutdown with {} connections and {} tunnels still active",
        ctx.connections.active(),
        ctx.tunnels.active()
    );
}
