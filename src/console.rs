//! Line-oriented operator console.
//!
//! Commands (case-insensitive):
//! - `block <host>`   refuse requests whose base host is `<host>`
//! - `unblock <host>` allow `<host>` again (the entry stays listed)
//! - `lblock`         list the blacklist
//! - `l`              list the response cache

use crate::cache::CacheEntry;
use crate::error::CommandError;
use crate::proxy::ProxyContext;
use std::fmt::Write as _;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{info, warn};

const PROMPT: &[u8] = b"-> ";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Block(String),
    Unblock(String),
    ListBlacklist,
    ListCache,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.to_lowercase();
        let mut words = input.split_whitespace();
        let name = words.next().unwrap_or_default();
        let host = words.next().map(str::to_string);

        match name {
            "block" => host
                .map(Command::Block)
                .ok_or(CommandError::MissingArgument("block")),
            "unblock" => host
                .map(Command::Unblock)
                .ok_or(CommandError::MissingArgument("unblock")),
            "lblock" => Ok(Command::ListBlacklist),
            "l" => Ok(Command::ListCache),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}

/// Apply `command` to the proxy and render the operator-facing reply.
pub async fn execute(command: Command, ctx: &ProxyContext) -> String {
    match command {
        Command::Block(host) => {
            ctx.block_host(&host).await;
            format!("{} blocked\n", host)
        }
        Command::Unblock(host) => {
            ctx.unblock_host(&host).await;
            format!("{} unblocked\n", host)
        }
        Command::ListBlacklist => {
            let entries = ctx.list_blacklist().await;
            if entries.is_empty() {
                return "blacklist is empty\n".to_string();
            }
            let mut out = String::new();
            for (host, blocked) in entries {
                let state = if blocked { "blocked" } else { "allowed" };
                let _ = writeln!(out, "{:<40} {}", host, state);
            }
            out
        }
        Command::ListCache => {
            let entries = ctx.list_cache().await;
            if entries.is_empty() {
                return "cache is empty\n".to_string();
            }
            let mut out = String::new();
            for (key, entry) in entries {
                let _ = writeln!(
                    out,
                    "{} status={} bytes={} {}",
                    key,
                    entry.content().status.as_u16(),
                    entry.content().body.len(),
                    freshness(&entry)
                );
            }
            out
        }
    }
}

fn freshness(entry: &CacheEntry) -> String {
    match entry.expires_at() {
        None => "never expires".to_string(),
        Some(_) if entry.is_expired() => "expired".to_string(),
        Some(at) => format!(
            "expires in {:.1}s",
            at.saturating_duration_since(Instant::now()).as_secs_f64()
        ),
    }
}

/// Read commands from `reader` until end of input, writing replies and the
/// prompt to `writer`. Bad input is reported and skipped.
pub async fn run<R, W>(ctx: &ProxyContext, mut reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        writer.write_all(PROMPT).await?;
        writer.flush().await?;

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            info!("Console input closed");
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<Command>() {
            Ok(command) => execute(command, ctx).await,
            Err(e) => {
                warn!("Rejected console command {:?}: {}", line.trim(), e);
                format!("error: {}\n", e)
            }
        };
        writer.write_all(reply.as_bytes()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedResponse;
    use crate::config::ProxyConfig;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};
    use tokio::io::BufReader;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "block Example.COM\n".parse::<Command>(),
            Ok(Command::Block("example.com".to_string()))
        );
        assert_eq!(
            "  unblock example.com  extra".parse::<Command>(),
            Ok(Command::Unblock("example.com".to_string()))
        );
        assert_eq!("lblock".parse::<Command>(), Ok(Command::ListBlacklist));
        assert_eq!("L\n".parse::<Command>(), Ok(Command::ListCache));
    }

    #[test]
    fn test_parse_rejects_missing_argument() {
        assert_eq!(
            "block".parse::<Command>(),
            Err(CommandError::MissingArgument("block"))
        );
        assert_eq!(
            "unblock \n".parse::<Command>(),
            Err(CommandError::MissingArgument("unblock"))
        );
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert_eq!(
            "flush all".parse::<Command>(),
            Err(CommandError::UnknownCommand("flush".to_string()))
        );
    }

    #[tokio::test]
    async fn test_run_applies_commands_and_survives_bad_input() {
        let ctx = ProxyContext::new(ProxyConfig::default());
        let input = b"block example.com\nblock\n\nunblock example.com\nblock ads.net\nlblock\n";
        let mut output = Vec::new();

        run(&ctx, BufReader::new(&input[..]), &mut output)
            .await
            .unwrap();

        assert_eq!(
            ctx.list_blacklist().await,
            vec![
                ("ads.net".to_string(), true),
                ("example.com".to_string(), false)
            ]
        );

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("error: `block` requires a host argument"));
        assert!(output.contains("example.com unblocked"));
        // Replies follow the prompt on the same line.
        let lines: Vec<&str> = output
            .lines()
            .map(|l| l.trim_start_matches("-> "))
            .collect();
        assert!(lines.iter().any(|l| l.starts_with("ads.net") && l.ends_with("blocked")));
        assert!(lines.iter().any(|l| l.starts_with("example.com") && l.ends_with("allowed")));
        assert!(output.ends_with("-> "));
    }

    #[tokio::test]
    async fn test_list_cache_output() {
        let ctx = ProxyContext::new(ProxyConfig::default());
        assert_eq!(execute(Command::ListCache, &ctx).await, "cache is empty\n");

        ctx.cache
            .store(
                "http://example.com/",
                CachedResponse {
                    status: StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(b"hello"),
                },
            )
            .await;

        let out = execute(Command::ListCache, &ctx).await;
        assert!(out.starts_with("http://example.com/ status=200 bytes=5 expires in"));
    }
}
