use http::StatusCode;

/// Per-request failures. Each one is contained to the request that caused it
/// and becomes a client-visible status code.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("host {0} is blacklisted")]
    BlockedHost(String),

    #[error("failed to connect to {addr}: {reason}")]
    DialFailure { addr: String, reason: String },

    #[error("connection does not support raw takeover")]
    HijackUnsupported,

    #[error("upstream request to {addr} failed: {reason}")]
    UpstreamForward { addr: String, reason: String },

    #[error("upstream request to {addr} timed out after {secs}s")]
    UpstreamTimeout { addr: String, secs: u64 },

    #[error("malformed request target: {0}")]
    MalformedRequest(String),
}

impl ProxyError {
    /// Status code reported to the proxy client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BlockedHost(_) => StatusCode::FORBIDDEN,
            ProxyError::DialFailure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::HijackUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamForward { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Rejected operator console input.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("`{0}` requires a host argument")]
    MissingArgument(&'static str),

    #[error("unknown command `{0}` (expected block, unblock, lblock or l)")]
    UnknownCommand(String),
}
