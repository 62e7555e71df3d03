//! CONNECT tunnelling.
//!
//! The proxy dials the requested authority, answers `200`, then takes the
//! client connection away from hyper and copies raw bytes in both
//! directions. Tunnelled traffic is never inspected.

use crate::connection::ConnectionGuard;
use crate::error::ProxyError;
use crate::proxy::{empty, ProxyBody, ProxyContext};
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Port assumed when a CONNECT authority carries none.
const DEFAULT_CONNECT_PORT: u16 = 443;
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Handle an already-admitted CONNECT request.
pub async fn establish(
    mut req: Request<Incoming>,
    ctx: &ProxyContext,
) -> Result<Response<ProxyBody>, ProxyError> {
    let addr = match req.uri().authority() {
        Some(authority) => format!(
            "{}:{}",
            authority.host(),
            authority.port_u16().unwrap_or(DEFAULT_CONNECT_PORT)
        ),
        None => return Err(ProxyError::MalformedRequest(req.uri().to_string())),
    };

    let destination = match dial(&addr, ctx.config.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("HTTPS connection to {} failed: {}", addr, e);
            return Err(e);
        }
    };

    let on_upgrade = match take_connection(&mut req) {
        Ok(on_upgrade) => on_upgrade,
        Err(e) => {
            warn!("Connection for CONNECT {} cannot be taken over", addr);
            return Err(e);
        }
    };

    let guard = ctx.tunnels.try_acquire();
    tokio::spawn(run_tunnel(on_upgrade, destination, addr, guard));

    Ok(Response::new(empty()))
}

/// Claim the client connection behind `req`. Fails when the server was not
/// set up to hand connections over.
fn take_connection<B>(req: &mut Request<B>) -> Result<OnUpgrade, ProxyError> {
    req.extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(ProxyError::HijackUnsupported)
}

/// Connect to `addr`, giving up after `timeout`.
pub async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, ProxyError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::DialFailure {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::DialFailure {
            addr: addr.to_string(),
            reason: format!("connection timed out after {:?}", timeout),
        }),
    }
}

async fn run_tunnel(
    on_upgrade: OnUpgrade,
    destination: TcpStream,
    addr: String,
    _guard: Option<ConnectionGuard>,
) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            warn!("upgrade error for {}: {}", addr, e);
            return;
        }
    };

    let (client_read, client_write) = tokio::io::split(TokioIo::new(upgraded));
    let (dest_read, dest_write) = destination.into_split();
    let pair = PairedClose::new();

    debug!("Tunnel to {} established", addr);
    let outbound = tokio::spawn(relay(dest_write, client_read, pair.clone()));
    let inbound = tokio::spawn(relay(client_write, dest_read, pair));

    let (outbound, inbound) = tokio::join!(outbound, inbound);
    let sent = outbound.ok().and_then(Result::ok).unwrap_or(0);
    let received = inbound.ok().and_then(Result::ok).unwrap_or(0);
    info!("Tunnel to {} closed: {}↑ {}↓ bytes", addr, sent, received);
}

/// Close signal shared by the two directions of one tunnel.
#[derive(Clone, Debug)]
pub struct PairedClose {
    closed: Arc<watch::Sender<bool>>,
}

impl PairedClose {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            closed: Arc::new(closed),
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for PairedClose {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `src` into `dst` until end-of-stream, an error, or the other
/// direction closing, and return the number of bytes moved. Both endpoints
/// are released on return and the pair is marked closed so the opposite
/// direction stops too.
pub async fn relay<W, R>(mut dst: W, mut src: R, pair: PairedClose) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    let closed = pair.wait();
    tokio::pin!(closed);

    let copied = loop {
        let step = async {
            let n = src.read(&mut buf).await?;
            if n > 0 {
                dst.write_all(&buf[..n]).await?;
            }
            Ok::<usize, io::Error>(n)
        };

        tokio::select! {
            res = step => match res {
                Ok(0) => break Ok(total),
                Ok(n) => total += n as u64,
                Err(e) => break Err(e),
            },
            _ = &mut closed => break Ok(total),
        }
    };

    if let Err(e) = dst.shutdown().await {
        debug!("relay shutdown error: {}", e);
    }
    drop(dst);
    drop(src);
    pair.close();

    copied
}
