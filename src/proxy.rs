//! Request dispatch: normalize the target host, consult the blacklist, then
//! either tunnel (CONNECT) or answer through the response cache.

use crate::blacklist::Blacklist;
use crate::cache::{CacheEntry, CachedResponse, ResponseCache};
use crate::config::ProxyConfig;
use crate::connection::ConnectionCounter;
use crate::domain::{base_host, connect_target, http_target};
use crate::error::ProxyError;
use crate::tunnel;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::Builder;
use hyper::header::{HeaderValue, CONNECTION, HOST};
use hyper::{Method, Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Header added to responses served from the cache.
pub const CACHED_HEADER: &str = "cached";

/// Shared state handed to every request handler and to the console.
#[derive(Debug)]
pub struct ProxyContext {
    pub config: ProxyConfig,
    pub blacklist: Blacklist,
    pub cache: ResponseCache,
    pub connections: Arc<ConnectionCounter>,
    pub tunnels: Arc<ConnectionCounter>,
}

impl ProxyContext {
    pub fn new(config: ProxyConfig) -> Arc<Self> {
        Arc::new(Self {
            blacklist: Blacklist::new(),
            cache: ResponseCache::new(config.cache_ttl),
            connections: ConnectionCounter::new(config.max_connections),
            tunnels: ConnectionCounter::new(0),
            config,
        })
    }

    pub async fn block_host(&self, host: &str) {
        self.blacklist.block_host(host).await;
        info!("{} added to blocked host list", host);
    }

    pub async fn unblock_host(&self, host: &str) {
        self.blacklist.unblock_host(host).await;
        info!("{} removed from blocked host list", host);
    }

    pub async fn list_blacklist(&self) -> Vec<(String, bool)> {
        self.blacklist.list().await
    }

    pub async fn list_cache(&self) -> Vec<(String, CacheEntry)> {
        self.cache.list().await
    }
}

/// hyper service entry point. Every failure is turned into a response.
pub async fn proxy(
    req: Request<Incoming>,
    ctx: Arc<ProxyContext>,
) -> Result<Response<ProxyBody>, hyper::Error> {
    match dispatch(req, &ctx).await {
        Ok(resp) => Ok(resp),
        Err(e) => Ok(error_response(&e)),
    }
}

async fn dispatch(
    req: Request<Incoming>,
    ctx: &ProxyContext,
) -> Result<Response<ProxyBody>, ProxyError> {
    let is_connect = req.method() == Method::CONNECT;
    let uri = req.uri().to_string();

    let target = if is_connect {
        match req.uri().authority() {
            Some(authority) => connect_target(authority.as_str()),
            None => return Err(ProxyError::MalformedRequest(uri)),
        }
    } else {
        if req.uri().authority().is_none() {
            warn!("HTTP request is not in absolute form: {}", uri);
            return Err(ProxyError::MalformedRequest(uri));
        }
        match http_target(&uri) {
            Some(target) => target,
            None => return Err(ProxyError::MalformedRequest(uri)),
        }
    };
    // Host names compare case-insensitively; blacklist keys are lowercase.
    let base = base_host(target).to_ascii_lowercase();

    info!(
        "Request received {} {} {} with base {}",
        req.method(),
        uri,
        target,
        base
    );

    if ctx.blacklist.is_blocked(&base).await {
        warn!("{} has been blocked", target);
        return Err(ProxyError::BlockedHost(base));
    }

    if is_connect {
        tunnel::establish(req, ctx).await
    } else {
        serve_http(req, uri, ctx).await
    }
}

/// Plain HTTP: answer GETs from the cache when possible, otherwise forward and
/// cache whatever came back.
async fn serve_http(
    req: Request<Incoming>,
    uri: String,
    ctx: &ProxyContext,
) -> Result<Response<ProxyBody>, ProxyError> {
    let key = ctx.config.cache_key.key(req.method(), &uri);

    let cached = ctx.cache.get(&key).await;
    if let Some(cached) = cached.filter(|_| req.method() == Method::GET) {
        debug!("Cache hit for {}", key);
        return Ok(into_response(cached, true));
    }

    let captured = forward(req, ctx).await?;
    ctx.cache.store(&key, captured.clone()).await;
    info!("New page cached {}", key);

    Ok(into_response(captured, false))
}

async fn forward(req: Request<Incoming>, ctx: &ProxyContext) -> Result<CachedResponse, ProxyError> {
    let host = match req.uri().host() {
        Some(h) => h,
        None => return Err(ProxyError::MalformedRequest(req.uri().to_string())),
    };
    let port = req.uri().port_u16().unwrap_or(80);
    let addr = format!("{}:{}", host, port);

    let timeout = ctx.config.upstream_timeout;
    let outcome = tokio::time::timeout(timeout, exchange(req, &addr, ctx.config.force_close)).await;
    match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!("HTTP request to {} timed out after {:?}", addr, timeout);
            Err(ProxyError::UpstreamTimeout {
                addr,
                secs: timeout.as_secs(),
            })
        }
    }
}

/// Send `req` to the origin at `addr` and read the whole response.
async fn exchange(
    mut req: Request<Incoming>,
    addr: &str,
    force_close: bool,
) -> Result<CachedResponse, ProxyError> {
    let upstream_error = |reason: String| {
        warn!("Upstream {} failed: {}", addr, reason);
        ProxyError::UpstreamForward {
            addr: addr.to_string(),
            reason,
        }
    };

    to_origin_form(&mut req);
    if force_close {
        req.headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }

    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| upstream_error(e.to_string()))?;

    let (mut sender, conn) = Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await
        .map_err(|e| upstream_error(e.to_string()))?;

    // Dropping the handle (including on timeout) tears the upstream socket down.
    let _driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("upstream connection error: {:?}", err);
        }
    }));

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| upstream_error(e.to_string()))?;
    let (parts, body) = resp.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| upstream_error(e.to_string()))?
        .to_bytes();

    Ok(CachedResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// Replace the absolute-form target a proxy receives with the origin-form
/// target an origin server expects, keeping the authority in `Host`.
fn to_origin_form(req: &mut Request<Incoming>) {
    if let Some(authority) = req.uri().authority() {
        if !req.headers().contains_key(HOST) {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                req.headers_mut().insert(HOST, value);
            }
        }
    }

    let origin_form = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse::<Uri>()
        .unwrap_or_else(|_| Uri::from_static("/"));
    *req.uri_mut() = origin_form;
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn into_response(captured: CachedResponse, hit: bool) -> Response<ProxyBody> {
    let mut resp = Response::new(full(captured.body));
    *resp.status_mut() = captured.status;
    *resp.headers_mut() = captured.headers;
    if hit {
        resp.headers_mut()
            .append(CACHED_HEADER, HeaderValue::from_static("1"));
    }
    resp
}

fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let mut resp = match err {
        ProxyError::DialFailure { .. } => Response::new(full(err.to_string())),
        ProxyError::HijackUnsupported => Response::new(full("Hijacking not supported")),
        _ => Response::new(empty()),
    };
    *resp.status_mut() = err.status();
    if let ProxyError::BlockedHost(_) = err {
        resp.headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
    }
    resp
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
