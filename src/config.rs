use crate::cache::CacheKeyPolicy;
use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Command line interface configuration
#[derive(Parser, Debug)]
#[command(
    author, version,
    about = "Forwarding HTTP/HTTPS proxy with a host blacklist and response cache",
    long_about = "fwdproxy serves plain HTTP requests through a short-lived response cache and \
tunnels CONNECT traffic untouched.\n\nOperator console (stdin):\n- block <host>   : refuse requests to a base host\n- unblock <host> : allow a base host again\n- lblock         : list the blacklist\n- l              : list the cache\n"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// IP address to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    pub listen_ip: Ipv4Addr,

    /// Seconds a cached response stays fresh (0 = never expires)
    #[arg(long, default_value_t = 10)]
    pub cache_ttl: u64,

    /// How cache keys are built. `target` keys by URI only, so a POST response
    /// can answer a later GET to the same URI.
    #[arg(long, value_enum, default_value_t = CacheKeyPolicy::Target)]
    pub cache_key: CacheKeyPolicy,

    /// Seconds allowed for a forwarded HTTP exchange before answering 504
    #[arg(long, default_value_t = 60)]
    pub upstream_timeout: u64,

    /// Seconds allowed to connect to a CONNECT target before answering 503
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Force 'Connection: close' on forwarded HTTP requests
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub force_close: bool,

    /// Maximum concurrent client connections (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_connections: usize,

    /// Do not read operator commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

/// Proxy server configuration derived from CLI arguments
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    /// `None` keeps cached responses until overwritten.
    pub cache_ttl: Option<Duration>,
    pub cache_key: CacheKeyPolicy,
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    pub force_close: bool,
    pub max_connections: usize,
    pub console: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            cache_ttl: Some(Duration::from_secs(10)),
            cache_key: CacheKeyPolicy::Target,
            upstream_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            force_close: true,
            max_connections: 0,
            console: true,
        }
    }
}

impl ProxyConfig {
    /// Create ProxyConfig from CLI arguments
    pub fn from_cli(args: Cli) -> color_eyre::Result<Self> {
        if args.connect_timeout == 0 {
            return Err(color_eyre::eyre::eyre!("--connect-timeout must be at least 1 second"));
        }
        if args.upstream_timeout == 0 {
            return Err(color_eyre::eyre::eyre!("--upstream-timeout must be at least 1 second"));
        }

        let cache_ttl = match args.cache_ttl {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            listen_addr: SocketAddr::from((args.listen_ip, args.port)),
            cache_ttl,
            cache_key: args.cache_key,
            upstream_timeout: Duration::from_secs(args.upstream_timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            force_close: args.force_close,
            max_connections: args.max_connections,
            console: !args.no_console,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("fwdproxy").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::from_cli(parse(&[])).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(10)));
        assert_eq!(config.cache_key, CacheKeyPolicy::Target);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.force_close);
        assert!(config.console);
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        let config = ProxyConfig::from_cli(parse(&["--cache-ttl", "0"])).unwrap();
        assert_eq!(config.cache_ttl, None);
    }

    #[test]
    fn test_overrides() {
        let config = ProxyConfig::from_cli(parse(&[
            "--port",
            "3128",
            "--listen-ip",
            "127.0.0.1",
            "--cache-key",
            "method-and-target",
            "--force-close",
            "false",
            "--max-connections",
            "64",
            "--no-console",
        ]))
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3128".parse().unwrap());
        assert_eq!(config.cache_key, CacheKeyPolicy::MethodAndTarget);
        assert!(!config.force_close);
        assert_eq!(config.max_connections, 64);
        assert!(!config.console);
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        assert!(ProxyConfig::from_cli(parse(&["--connect-timeout", "0"])).is_err());
    }
}
