//! Temporal locks over shards
//!
//! A shard with a lock entry is non-participating until its unlock time.
//! Locks are registered either at an absolute ISO-8601 instant or relative
//! to the manager's clock; the last write for a shard wins. There is no
//! explicit unlock: entries simply stop applying once their time passes.

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use quorix_common::{Clock, LockError, Result, ShardIndex, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Accepted naive formats, interpreted as UTC
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Lock registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LockRequest {
    /// Lock until an ISO-8601 timestamp
    Absolute {
        shard_idx: ShardIndex,
        unlock_time: String,
    },
    /// Lock for a number of seconds from now
    Relative {
        shard_idx: ShardIndex,
        duration_secs: f64,
    },
}

/// Outcome of a lock registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockReceipt {
    pub shard_idx: ShardIndex,
    pub unlock_at: DateTime<Utc>,
}

/// Per-shard unlock times
#[derive(Debug)]
pub struct TemporalLockManager {
    locks: DashMap<ShardIndex, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl TemporalLockManager {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: DashMap::new(),
            clock,
        }
    }

    /// Lock `shard_idx` until an absolute ISO-8601 time.
    ///
    /// Offsets are honoured; timestamps without one are read as UTC. On a
    /// parse failure the lock map is left untouched.
    pub fn add_absolute_lock(&self, shard_idx: ShardIndex, unlock_time: &str) -> Result<DateTime<Utc>> {
        let unlock_at = parse_iso8601(unlock_time)?;
        self.locks.insert(shard_idx, unlock_at);
        info!(shard = shard_idx, unlock_at = %unlock_at, "Absolute lock registered");
        Ok(unlock_at)
    }

    /// Lock `shard_idx` for `duration_seconds` from the current time
    pub fn add_relative_lock(&self, shard_idx: ShardIndex, duration_seconds: f64) -> Result<DateTime<Utc>> {
        if !duration_seconds.is_finite() || duration_seconds < 0.0 {
            return Err(LockError::InvalidDuration(duration_seconds).into());
        }

        let micros = (duration_seconds * 1_000_000.0).round();
        if micros >= i64::MAX as f64 {
            return Err(LockError::InvalidDuration(duration_seconds).into());
        }
        let unlock_at = self
            .clock
            .now()
            .checked_add_signed(chrono::Duration::microseconds(micros as i64))
            .ok_or(LockError::InvalidDuration(duration_seconds))?;

        self.locks.insert(shard_idx, unlock_at);
        info!(shard = shard_idx, duration_seconds, unlock_at = %unlock_at, "Relative lock registered");
        Ok(unlock_at)
    }

    /// Register a lock from a request payload
    pub fn apply(&self, request: &LockRequest) -> Result<LockReceipt> {
        let (shard_idx, unlock_at) = match request {
            LockRequest::Absolute { shard_idx, unlock_time } => {
                (*shard_idx, self.add_absolute_lock(*shard_idx, unlock_time)?)
            }
            LockRequest::Relative { shard_idx, duration_secs } => {
                (*shard_idx, self.add_relative_lock(*shard_idx, *duration_secs)?)
            }
        };
        Ok(LockReceipt { shard_idx, unlock_at })
    }

    /// True iff a lock exists and `at` is strictly before its unlock time
    pub fn is_locked(&self, shard_idx: ShardIndex, at: DateTime<Utc>) -> bool {
        self.locks
            .get(&shard_idx)
            .map(|unlock_at| at < *unlock_at)
            .unwrap_or(false)
    }

    /// [`is_locked`](Self::is_locked) at the manager's current time
    pub fn is_locked_now(&self, shard_idx: ShardIndex) -> bool {
        self.is_locked(shard_idx, self.clock.now())
    }

    /// Ascending indices in `[0, total_count)` that are not locked at `at`
    pub fn unlocked_shards(&self, total_count: ShardIndex, at: DateTime<Utc>) -> Vec<ShardIndex> {
        (0..total_count).filter(|i| !self.is_locked(*i, at)).collect()
    }

    /// Subset of `indices` locked at `at`, with unlock times, in input order
    pub fn locked_among(
        &self,
        indices: &[ShardIndex],
        at: DateTime<Utc>,
    ) -> Vec<(ShardIndex, DateTime<Utc>)> {
        let locked: Vec<_> = indices
            .iter()
            .filter_map(|i| {
                self.locks
                    .get(i)
                    .filter(|unlock_at| at < **unlock_at)
                    .map(|unlock_at| (*i, *unlock_at))
            })
            .collect();
        debug!(checked = indices.len(), locked = locked.len(), "Lock snapshot taken");
        locked
    }

    pub fn unlock_time(&self, shard_idx: ShardIndex) -> Option<DateTime<Utc>> {
        self.locks.get(&shard_idx).map(|entry| *entry)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for TemporalLockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_iso8601(value: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| LockError::InvalidTimestamp(value.to_string()).into())
}
