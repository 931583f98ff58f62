//! Quorix node configuration

use anyhow::{Context, Result};
use quorix_ledger::{LockRequest, RoundConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Node configuration, read from `QUORIX_*` environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Shards taking part in every round
    pub shard_indices: Vec<u32>,
    /// Offer kind: pair/bell or group/ghz
    pub kind: String,
    /// Offer TTL and collection deadline
    pub ttl_secs: u64,
    /// Shots requested per node
    pub repetitions: usize,
    /// Rounds to run before exiting
    pub rounds: usize,
    pub expected_tolerance: f64,
    /// ecdsa or hmac
    pub signing_method: String,
    pub quick_verify: bool,
    /// `shard:seconds` entries, e.g. `2:10.5`
    pub relative_locks: Vec<String>,
    /// `shard@timestamp` entries, e.g. `1@2030-01-01T00:00:00Z`
    pub absolute_locks: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let round = RoundConfig::default();
        Self {
            shard_indices: vec![0, 1, 2, 3, 4],
            kind: "group".to_string(),
            ttl_secs: round.default_ttl.as_secs(),
            repetitions: 256,
            rounds: 1,
            expected_tolerance: round.expected_tolerance,
            signing_method: "ecdsa".to_string(),
            quick_verify: false,
            relative_locks: Vec::new(),
            absolute_locks: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Self::load_from(None)
    }

    /// Layer `QUORIX_*` variables over the defaults. `env` replaces the
    /// process environment when given.
    fn load_from(env: Option<HashMap<String, String>>) -> Result<Self> {
        let environment = ::config::Environment::with_prefix("QUORIX")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("shard_indices")
            .with_list_parse_key("relative_locks")
            .with_list_parse_key("absolute_locks")
            .source(env);

        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Self::default())?)
            .add_source(environment)
            .build()
            .context("failed to read QUORIX_* settings")?;

        let cfg: Self = settings
            .try_deserialize()
            .context("invalid QUORIX_* settings")?;
        Ok(cfg)
    }

    pub fn round_config(&self) -> RoundConfig {
        RoundConfig {
            expected_tolerance: self.expected_tolerance,
            default_ttl: Duration::from_secs(self.ttl_secs),
            repetitions: self.repetitions,
        }
    }

    /// Parse the configured lock entries
    pub fn lock_requests(&self) -> Result<Vec<LockRequest>> {
        let relative = self.relative_locks.iter().map(|entry| -> Result<LockRequest> {
            let (shard, secs) = entry
                .split_once(':')
                .with_context(|| format!("relative lock '{}' is not shard:seconds", entry))?;
            Ok(LockRequest::Relative {
                shard_idx: shard.trim().parse().with_context(|| format!("bad shard in '{}'", entry))?,
                duration_secs: secs.trim().parse().with_context(|| format!("bad duration in '{}'", entry))?,
            })
        });
        let absolute = self.absolute_locks.iter().map(|entry| -> Result<LockRequest> {
            let (shard, time) = entry
                .split_once('@')
                .with_context(|| format!("absolute lock '{}' is not shard@timestamp", entry))?;
            Ok(LockRequest::Absolute {
                shard_idx: shard.trim().parse().with_context(|| format!("bad shard in '{}'", entry))?,
                unlock_time: time.trim().to_string(),
            })
        });
        relative.chain(absolute).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults_without_env() {
        let cfg = NodeConfig::load_from(env(&[])).unwrap();
        assert_eq!(cfg.shard_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(cfg.signing_method, "ecdsa");
        assert_eq!(cfg.round_config().expected_tolerance, 0.9);
        assert!(cfg.lock_requests().unwrap().is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = NodeConfig::load_from(env(&[
            ("QUORIX_SHARD_INDICES", "3,4,5"),
            ("QUORIX_SIGNING_METHOD", "hmac"),
            ("QUORIX_TTL_SECS", "12"),
            ("QUORIX_QUICK_VERIFY", "true"),
            ("QUORIX_RELATIVE_LOCKS", "4:2.5"),
        ]))
        .unwrap();

        assert_eq!(cfg.shard_indices, vec![3, 4, 5]);
        assert_eq!(cfg.signing_method, "hmac");
        assert_eq!(cfg.round_config().default_ttl, Duration::from_secs(12));
        assert!(cfg.quick_verify);
        assert_eq!(
            cfg.lock_requests().unwrap(),
            vec![LockRequest::Relative { shard_idx: 4, duration_secs: 2.5 }]
        );
    }

    #[test]
    fn test_lock_entry_parsing() {
        let cfg = NodeConfig {
            relative_locks: vec!["2:10".to_string()],
            absolute_locks: vec!["1@2030-01-01T00:00:00Z".to_string()],
            ..Default::default()
        };
        let requests = cfg.lock_requests().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(matches!(
            &requests[1],
            LockRequest::Absolute { shard_idx: 1, unlock_time } if unlock_time == "2030-01-01T00:00:00Z"
        ));

        let bad = NodeConfig {
            relative_locks: vec!["two:ten".to_string()],
            ..Default::default()
        };
        assert!(bad.lock_requests().is_err());
    }
}
