//! ResourceOffer - time-bounded reservation of shard indices
//!
//! An offer is created by the resource oracle at the start of every
//! consensus round. Its TTL doubles as the round's collection deadline.

use crate::error::OfferError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Logical participant index
pub type ShardIndex = u32;

/// Kind of correlated resource an offer reserves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    /// Two-party correlation (Bell pair)
    Pair,
    /// N-party correlation (GHZ group)
    GroupGhz,
}

impl FromStr for OfferKind {
    type Err = OfferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pair" | "bell" => Ok(OfferKind::Pair),
            "group" | "ghz" => Ok(OfferKind::GroupGhz),
            _ => Err(OfferError::InvalidKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for OfferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferKind::Pair => write!(f, "pair"),
            OfferKind::GroupGhz => write!(f, "group"),
        }
    }
}

/// Diagnostic attached to an offer by a quick verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationHint {
    /// Sample drawn from the measurement source
    Sampled {
        agreement_rate: f64,
        /// First few histogram entries
        sample_histogram: BTreeMap<String, u64>,
        /// Pairwise correlation per shard pair, keyed `"i-j"`
        pairwise_correlations: BTreeMap<String, f64>,
    },
    /// The source could not produce a hint
    Unavailable { error: String },
}

/// Time-bounded reservation of shard indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOffer {
    /// Random 128-bit hex token
    pub offer_id: String,

    pub created_at: DateTime<Utc>,

    /// Ordered, distinct shard indices (at least 2)
    pub shard_indices: Vec<ShardIndex>,

    pub kind: OfferKind,

    /// Always `shard_indices.len()`
    pub expected_unit_count: usize,

    pub ttl: Duration,

    pub verification_hint: Option<VerificationHint>,
}

impl ResourceOffer {
    /// True iff `now - created_at > ttl`. An offer is still live at the
    /// exact expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(elapsed) => elapsed > self.ttl,
            // now precedes created_at
            Err(_) => false,
        }
    }

    /// Instant after which the offer is expired
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// One page of the offer ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferPage {
    pub page: u64,
    pub page_size: u64,
    pub total: u64,
    pub offers: Vec<ResourceOffer>,
}
