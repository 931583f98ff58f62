//! Validation results and cluster decisions
//!
//! Every report that enters a round produces exactly one
//! [`ValidationResult`], valid or not. Invalid reports stay in the audit
//! trail and count toward `num_reports`.

use super::offer::{ResourceOffer, ShardIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why a report was marked invalid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Signature did not verify over the canonical bytes
    InvalidSignature,
    /// No bit-strings in the report
    EmptyPayload,
    /// Wrong width or characters outside `{0,1}`
    InvalidBitstringFormat,
    /// Agreement rate below the validator tolerance
    LowAgreement,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::InvalidSignature => write!(f, "invalid_signature"),
            RejectionReason::EmptyPayload => write!(f, "empty_payload"),
            RejectionReason::InvalidBitstringFormat => write!(f, "invalid_bitstring_format"),
            RejectionReason::LowAgreement => write!(f, "low_agreement"),
        }
    }
}

/// Per-node verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub node_id: String,
    pub valid: bool,
    pub reason: Option<RejectionReason>,
    /// Fraction of bit-strings whose characters are all equal
    pub agreement_rate: f64,
    pub histogram: BTreeMap<String, u64>,
    pub trust_score: f64,
}

impl ValidationResult {
    /// Result for a report rejected before scoring
    pub fn rejected(node_id: impl Into<String>, reason: RejectionReason) -> Self {
        Self {
            node_id: node_id.into(),
            valid: false,
            reason: Some(reason),
            agreement_rate: 0.0,
            histogram: BTreeMap::new(),
            trust_score: 0.0,
        }
    }
}

/// Cluster-level metrics over all results of a round
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub avg_agreement: f64,
    pub avg_trust: f64,
    pub num_valid: usize,
    pub num_reports: usize,
}

impl AggregateMetrics {
    /// Smallest number of valid reports that forms a majority: `ceil(n / 2)`
    pub fn majority_threshold(&self) -> usize {
        self.num_reports.div_ceil(2)
    }
}

/// Offer snapshot plus aggregate metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMetrics {
    pub offer_id: String,
    pub offer_snapshot: ResourceOffer,
    pub aggregate: AggregateMetrics,
}

/// Final output of one consensus round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDecision {
    /// UUIDv7, time-ordered
    pub round_id: Uuid,
    pub achieved: bool,
    pub metrics: DecisionMetrics,
    /// Per-node results in shard order
    pub raw_reports: Vec<ValidationResult>,
    /// Shards that were locked when the round started
    pub locked_shards: Vec<ShardIndex>,
    pub decided_at: DateTime<Utc>,
}

impl ClusterDecision {
    /// Results that failed validation
    pub fn rejected(&self) -> impl Iterator<Item = &ValidationResult> {
        self.raw_reports.iter().filter(|r| !r.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_result_is_zeroed() {
        let result = ValidationResult::rejected("node-1", RejectionReason::InvalidSignature);
        assert!(!result.valid);
        assert_eq!(result.agreement_rate, 0.0);
        assert_eq!(result.trust_score, 0.0);
        assert!(result.histogram.is_empty());
    }

    #[test]
    fn test_majority_threshold_rounds_up() {
        let agg = |n| AggregateMetrics {
            num_reports: n,
            ..Default::default()
        };
        assert_eq!(agg(10).majority_threshold(), 5);
        assert_eq!(agg(5).majority_threshold(), 3);
        assert_eq!(agg(0).majority_threshold(), 0);
    }

    #[test]
    fn test_reason_serializes_snake_case() {
        let json = serde_json::to_string(&RejectionReason::InvalidBitstringFormat).unwrap();
        assert_eq!(json, "\"invalid_bitstring_format\"");
    }
}
