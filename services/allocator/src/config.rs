//! Configuration for the allocator service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use simalloc_ledger::ErrorPolicy;

/// Allocator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,

    /// Scenario dataset (CSV), read once at startup.
    pub dataset_path: PathBuf,

    /// Persisted allocation ledger (JSON).
    pub ledger_path: PathBuf,

    /// Directory receiving one JSON file per completed iteration.
    pub results_dir: PathBuf,

    /// Shared bearer token required on `/v1` routes, if set.
    pub api_token: Option<String>,

    /// How often a dirty ledger is re-written.
    pub flush_interval: Duration,

    /// What recovery does with `error` entries.
    pub error_policy: ErrorPolicy,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// JSON log file mirroring stdout, if set.
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let listen_addr = get("SIMALLOC_LISTEN_ADDR", "127.0.0.1:8080")
            .parse::<SocketAddr>()
            .context("SIMALLOC_LISTEN_ADDR is not a socket address")?;

        let dataset_path = PathBuf::from(get("SIMALLOC_DATASET_PATH", "data/scenarios.csv"));
        let ledger_path = PathBuf::from(get("SIMALLOC_LEDGER_PATH", "data/allocations.json"));
        let results_dir = PathBuf::from(get("SIMALLOC_RESULTS_DIR", "data/results"));

        let api_token = lookup("SIMALLOC_API_TOKEN").filter(|t| !t.trim().is_empty());

        let flush_interval_secs = get("SIMALLOC_FLUSH_INTERVAL_SECS", "30")
            .parse::<u64>()
            .context("SIMALLOC_FLUSH_INTERVAL_SECS must be a whole number of seconds")?;
        if flush_interval_secs == 0 {
            return Err(anyhow!("SIMALLOC_FLUSH_INTERVAL_SECS must be greater than zero"));
        }

        let error_policy = get("SIMALLOC_ERROR_POLICY", "keep")
            .parse::<ErrorPolicy>()
            .map_err(|e: String| anyhow!("SIMALLOC_ERROR_POLICY: {e}"))?;

        let log_level = get("SIMALLOC_LOG_LEVEL", "info");
        let log_file = lookup("SIMALLOC_LOG_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            dataset_path,
            ledger_path,
            results_dir,
            api_token,
            flush_interval: Duration::from_secs(flush_interval_secs),
            error_policy,
            log_level,
            log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.dataset_path, PathBuf::from("data/scenarios.csv"));
        assert_eq!(config.ledger_path, PathBuf::from("data/allocations.json"));
        assert!(config.api_token.is_none());
        assert_eq!(config.flush_interval, Duration::from_secs(30));
        assert_eq!(config.error_policy, ErrorPolicy::Keep);
        assert_eq!(config.log_level, "info");
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SIMALLOC_LISTEN_ADDR", "0.0.0.0:9000"),
            ("SIMALLOC_API_TOKEN", "s3cret"),
            ("SIMALLOC_FLUSH_INTERVAL_SECS", "5"),
            ("SIMALLOC_ERROR_POLICY", "requeue"),
            ("SIMALLOC_LOG_FILE", "logs/allocator.json"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.api_token.as_deref(), Some("s3cret"));
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.error_policy, ErrorPolicy::Requeue);
        assert_eq!(config.log_file, Some(PathBuf::from("logs/allocator.json")));
    }

    #[test]
    fn test_blank_token_means_no_auth() {
        let config = config(&[("SIMALLOC_API_TOKEN", "  ")]).unwrap();
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config(&[("SIMALLOC_LISTEN_ADDR", "nope")]).is_err());
        assert!(config(&[("SIMALLOC_FLUSH_INTERVAL_SECS", "0")]).is_err());
        assert!(config(&[("SIMALLOC_ERROR_POLICY", "retry")]).is_err());
    }
}
