//! Daemon configuration: command line, environment and warm-source file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// ShelfCache daemon
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// HTTP bind address for the ops endpoints
    #[arg(short, long, env = "SHELFD_BIND", default_value = "127.0.0.1:8080")]
    pub bind: String,

    /// Serve the L2 store over RESP on this address
    #[arg(long, env = "SHELFD_RESP_BIND")]
    pub resp_bind: Option<String>,

    /// Use a remote RESP server as L2 instead of an in-process store
    #[arg(long, env = "SHELFD_L2_ADDR")]
    pub l2_addr: Option<String>,

    /// L1 capacity (number of entries)
    #[arg(long, env = "SHELFD_L1_CAPACITY", default_value_t = 1000)]
    pub l1_capacity: usize,

    /// L1 default TTL in seconds
    #[arg(long, env = "SHELFD_L1_TTL", default_value_t = 300)]
    pub l1_ttl_secs: u64,

    /// In-process L2 capacity (number of entries)
    #[arg(long, env = "SHELFD_L2_CAPACITY", default_value_t = 10_000)]
    pub l2_capacity: usize,

    /// L2 default TTL in seconds
    #[arg(long, env = "SHELFD_L2_TTL", default_value_t = 600)]
    pub l2_ttl_secs: u64,

    /// Seconds between expired-entry sweeps
    #[arg(long, env = "SHELFD_CLEANUP_INTERVAL", default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    /// Seconds between warm passes
    #[arg(long, env = "SHELFD_WARM_INTERVAL", default_value_t = 600)]
    pub warm_interval_secs: u64,

    /// TOML file listing `[[source]]` entries to keep warm
    #[arg(long, env = "SHELFD_WARM_SOURCES")]
    pub warm_sources: Option<PathBuf>,

    /// Health check mode (for Docker)
    #[arg(long)]
    pub health: bool,
}

impl Args {
    /// L1 default TTL
    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_secs.max(1))
    }

    /// L2 default TTL
    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_secs.max(1))
    }

    /// Cleanup period
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Warm period
    pub fn warm_interval(&self) -> Duration {
        Duration::from_secs(self.warm_interval_secs.max(1))
    }
}

/// One upstream endpoint whose JSON body is kept cached under `key`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WarmSource {
    /// Cache key
    pub key: String,
    /// URL fetched with GET
    pub url: String,
    /// TTL override; the tier defaults apply when absent
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    /// Optional key namespace
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WarmSourcesFile {
    #[serde(default)]
    source: Vec<WarmSource>,
}

/// Parse a warm-sources document
pub fn parse_warm_sources(text: &str) -> Result<Vec<WarmSource>> {
    let file: WarmSourcesFile = toml::from_str(text).context("invalid warm sources file")?;
    Ok(file.source)
}

/// Read and parse a warm-sources file
pub fn load_warm_sources(path: &Path) -> Result<Vec<WarmSource>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read warm sources from {}", path.display()))?;
    parse_warm_sources(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["shelfd"]);
        assert_eq!(args.bind, "127.0.0.1:8080");
        assert_eq!(args.resp_bind, None);
        assert_eq!(args.l1_capacity, 1000);
        assert_eq!(args.l1_ttl(), Duration::from_secs(300));
        assert_eq!(args.l2_ttl(), Duration::from_secs(600));
        assert_eq!(args.warm_interval(), Duration::from_secs(600));
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "shelfd",
            "--resp-bind",
            "127.0.0.1:6380",
            "--l2-addr",
            "10.0.0.5:6379",
            "--l1-ttl-secs",
            "0",
        ]);
        assert_eq!(args.resp_bind.as_deref(), Some("127.0.0.1:6380"));
        assert_eq!(args.l2_addr.as_deref(), Some("10.0.0.5:6379"));
        assert_eq!(args.l1_ttl(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_warm_sources() {
        let sources = parse_warm_sources(
            r#"
            [[source]]
            key = "analytics:summary"
            url = "http://127.0.0.1:3000/api/analytics/summary"
            ttl_secs = 600

            [[source]]
            key = "products:list"
            url = "http://127.0.0.1:3000/api/products"
            prefix = "brand:1"
            "#,
        )
        .unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].key, "analytics:summary");
        assert_eq!(sources[0].ttl_secs, Some(600));
        assert_eq!(sources[1].ttl_secs, None);
        assert_eq!(sources[1].prefix.as_deref(), Some("brand:1"));
    }

    #[test]
    fn test_empty_and_invalid_sources() {
        assert!(parse_warm_sources("").unwrap().is_empty());
        assert!(parse_warm_sources("[[source]]\nkey = 1").is_err());
    }
}
