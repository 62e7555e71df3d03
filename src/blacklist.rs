use std::collections::HashMap;
use tokio::sync::RwLock;

/// Operator-controlled host blacklist keyed by base host.
///
/// Each host is in one of three states: unknown (no entry), blocked, or
/// explicitly allowed. Unblocking flips the flag instead of removing the
/// entry, so a host once mentioned stays listed for the process lifetime.
#[derive(Debug, Default)]
pub struct Blacklist {
    hosts: RwLock<HashMap<String, bool>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether requests to `base_host` must be refused.
    pub async fn is_blocked(&self, base_host: &str) -> bool {
        let hosts = self.hosts.read().await;
        hosts.get(base_host).copied().unwrap_or(false)
    }

    pub async fn block_host(&self, host: &str) {
        self.set(host, true).await;
    }

    pub async fn unblock_host(&self, host: &str) {
        self.set(host, false).await;
    }

    /// Snapshot of every known host and its block flag, sorted by host.
    pub async fn list(&self) -> Vec<(String, bool)> {
        let hosts = self.hosts.read().await;
        let mut entries: Vec<(String, bool)> = hosts
            .iter()
            .map(|(host, blocked)| (host.clone(), *blocked))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    async fn set(&self, host: &str, blocked: bool) {
        let mut hosts = self.hosts.write().await;
        hosts.insert(host.to_string(), blocked);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_host_is_allowed() {
        let blacklist = Blacklist::new();
        assert!(!blacklist.is_blocked("example.com").await);
        assert!(blacklist.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_block_then_unblock_keeps_entry() {
        let blacklist = Blacklist::new();

        blacklist.block_host("example.com").await;
        assert!(blacklist.is_blocked("example.com").await);

        blacklist.unblock_host("example.com").await;
        assert!(!blacklist.is_blocked("example.com").await);
        assert_eq!(
            blacklist.list().await,
            vec![("example.com".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_unblock_unknown_host_creates_allowed_entry() {
        let blacklist = Blacklist::new();
        blacklist.unblock_host("example.org").await;

        assert!(!blacklist.is_blocked("example.org").await);
        assert_eq!(
            blacklist.list().await,
            vec![("example.org".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let blacklist = Blacklist::new();
        blacklist.block_host("zeta.com").await;
        blacklist.block_host("alpha.com").await;
        blacklist.unblock_host("mid.com").await;

        let hosts: Vec<String> = blacklist.list().await.into_iter().map(|(h, _)| h).collect();
        assert_eq!(hosts, vec!["alpha.com", "mid.com", "zeta.com"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_console_writes_and_reads() {
        let blacklist = Arc::new(Blacklist::new());
        let mut tasks = Vec::new();

        for i in 0..32 {
            let blacklist = Arc::clone(&blacklist);
            tasks.push(tokio::spawn(async move {
                let host = format!("host{}.com", i % 4);
                for _ in 0..100 {
                    if i % 2 == 0 {
                        blacklist.block_host(&host).await;
                    } else {
                        let _ = blacklist.is_blocked(&host).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Only even-indexed tasks wrote, and they only blocked.
        assert_eq!(
            blacklist.list().await,
            vec![("host0.com".to_string(), true), ("host2.com".to_string(), true)]
        );
    }
}
