//! Configuration for federationd

use crate::anti_entropy::AntiEntropyConfig;
use crate::peers::FederationNode;
use clap::Parser;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// federationd - swarm federation state reconciliation daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "federationd")]
#[command(about = "Peer-to-peer CRDT reconciliation of threat intel, rules and metrics")]
pub struct Config {
    /// Listen address for the HTTP API
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Node identifier (defaults to node-<pid>)
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Bootstrap peers (comma-separated id@host:port)
    #[arg(long, value_delimiter = ',')]
    pub bootstrap: Vec<BootstrapPeer>,

    /// Anti-entropy interval in seconds
    #[arg(long, default_value = "30")]
    pub sync_interval_secs: u64,

    /// Peers contacted per anti-entropy round
    #[arg(long, default_value = "3")]
    pub fanout: usize,

    /// Per-peer sync timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub rpc_timeout_ms: u64,

    /// Evict quarantined or failing offline peers silent this long (0 disables)
    #[arg(long, default_value = "3600")]
    pub peer_eviction_secs: u64,

    /// Maximum accepted request body in bytes
    #[arg(long, default_value = "10485760")]
    pub max_body_bytes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(id) = &self.node_id {
            if id.trim().is_empty() {
                anyhow::bail!("Node id cannot be empty");
            }
        }
        if self.sync_interval_secs == 0 {
            anyhow::bail!("Sync interval must be at least one second");
        }
        if self.fanout == 0 {
            anyhow::bail!("Fanout must be at least 1");
        }
        if self.rpc_timeout_ms == 0 {
            anyhow::bail!("RPC timeout must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        let node_id = self.node_id();
        if self.bootstrap.iter().any(|peer| peer.id == node_id) {
            anyhow::bail!("Bootstrap list contains this node ({})", node_id);
        }
        Ok(())
    }

    pub fn node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| format!("node-{}", std::process::id()))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn anti_entropy(&self) -> AntiEntropyConfig {
        AntiEntropyConfig {
            interval: Duration::from_secs(self.sync_interval_secs),
            fanout: self.fanout,
            rpc_timeout: self.rpc_timeout(),
            peer_eviction: (self.peer_eviction_secs > 0)
                .then(|| Duration::from_secs(self.peer_eviction_secs)),
        }
    }
}

/// Peer given on the command line as `id@host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPeer {
    pub id: String,
    pub address: String,
}

impl FromStr for BootstrapPeer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('@') {
            Some((id, address)) if !id.is_empty() && !address.is_empty() => Ok(Self {
                id: id.to_string(),
                address: address.to_string(),
            }),
            _ => Err(format!("expected id@host:port, got {s:?}")),
        }
    }
}

impl From<&BootstrapPeer> for FederationNode {
    fn from(peer: &BootstrapPeer) -> Self {
        FederationNode::new(peer.id.as_str(), peer.address.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("federationd").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["--node-id", "n1"]);
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.sync_interval_secs, 30);
        assert_eq!(config.fanout, 3);
        assert_eq!(config.rpc_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());

        let ae = config.anti_entropy();
        assert_eq!(ae.interval, Duration::from_secs(30));
        assert_eq!(ae.peer_eviction, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_bootstrap_list() {
        let config = parse(&["--node-id", "n1", "--bootstrap", "n2@10.0.0.2:8080,n3@10.0.0.3:8080"]);
        assert_eq!(config.bootstrap.len(), 2);
        assert_eq!(config.bootstrap[1].id, "n3");
        assert_eq!(config.bootstrap[1].address, "10.0.0.3:8080");
    }

    #[test]
    fn test_bad_bootstrap_entry() {
        assert!("10.0.0.2:8080".parse::<BootstrapPeer>().is_err());
        assert!("@10.0.0.2:8080".parse::<BootstrapPeer>().is_err());
        assert!("n2@".parse::<BootstrapPeer>().is_err());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(parse(&["--node-id", " "]).validate().is_err());
        assert!(parse(&["--node-id", "n", "--fanout", "0"]).validate().is_err());
        assert!(parse(&["--node-id", "n", "--sync-interval-secs", "0"]).validate().is_err());
        assert!(parse(&["--node-id", "n", "--rpc-timeout-ms", "0"]).validate().is_err());
        assert!(parse(&["--node-id", "n", "--log-format", "xml"]).validate().is_err());
        assert!(parse(&["--node-id", "n", "--bootstrap", "n@h:1"]).validate().is_err());
    }

    #[test]
    fn test_eviction_disabled() {
        let config = parse(&["--node-id", "n", "--peer-eviction-secs", "0"]);
        assert_eq!(config.anti_entropy().peer_eviction, None);
    }
}
