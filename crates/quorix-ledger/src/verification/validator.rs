//! Witness report validation
//!
//! Validation runs in two stages:
//! 1. Signature check over the canonical report bytes. A failure
//!    short-circuits to an `InvalidSignature` verdict without looking at
//!    the payload.
//! 2. Structural scoring: payload shape, histogram, agreement rate, and a
//!    trust score weighted by optional biometric fidelity.
//!
//! A shot "agrees" when all of its characters are equal (`000…` or
//! `111…`), which is what a correlated GHZ measurement yields. Agreement
//! is judged per shot; disagreement between shots is expected.

use quorix_common::crypto::verify_signature;
use quorix_common::{
    AggregateMetrics, QuorixError, RejectionReason, Result, SignedReport, SigningMethod,
    ValidationResult, VerificationHint, WitnessReport, DEFAULT_EXPECTED_TOLERANCE,
};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};

/// Histogram entries kept in a verification hint
const HINT_HISTOGRAM_ENTRIES: usize = 3;

/// Validator for one shard count and tolerance
#[derive(Debug, Clone)]
pub struct ReportValidator {
    num_shards: usize,
    expected_tolerance: f64,
}

impl ReportValidator {
    /// Create a validator; `num_shards` must be at least 2 and the
    /// tolerance must lie in `[0, 1]`
    pub fn new(num_shards: usize, expected_tolerance: f64) -> Result<Self> {
        if num_shards < 2 {
            return Err(QuorixError::Config(format!(
                "num_shards must be >= 2, got {}",
                num_shards
            )));
        }
        if !(0.0..=1.0).contains(&expected_tolerance) {
            return Err(QuorixError::Config(format!(
                "expected_tolerance must be within [0, 1], got {}",
                expected_tolerance
            )));
        }
        Ok(Self {
            num_shards,
            expected_tolerance,
        })
    }

    /// Validator with the default tolerance
    pub fn with_default_tolerance(num_shards: usize) -> Result<Self> {
        Self::new(num_shards, DEFAULT_EXPECTED_TOLERANCE)
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn expected_tolerance(&self) -> f64 {
        self.expected_tolerance
    }

    /// Check a report's signature against the key material it carries
    pub fn verify_signature(&self, signed: &SignedReport, method: SigningMethod) -> bool {
        verify_signature(
            method,
            &signed.signer_key_material,
            &signed.report.canonical_bytes(),
            &signed.signature,
        )
    }

    /// Full validation: signature first, then structure
    #[instrument(skip(self, signed), fields(node = %signed.report.node_id))]
    pub fn validate_signed(&self, signed: &SignedReport, method: SigningMethod) -> ValidationResult {
        if !self.verify_signature(signed, method) {
            warn!(method = %method, "Report signature rejected");
            return ValidationResult::rejected(
                signed.report.node_id.clone(),
                RejectionReason::InvalidSignature,
            );
        }
        self.validate(&signed.report)
    }

    /// Structural validation and scoring of an authenticated report
    pub fn validate(&self, report: &WitnessReport) -> ValidationResult {
        if report.bitstrings.is_empty() {
            return ValidationResult::rejected(report.node_id.clone(), RejectionReason::EmptyPayload);
        }

        let well_formed = report
            .bitstrings
            .iter()
            .all(|s| s.len() == self.num_shards && s.bytes().all(|b| b == b'0' || b == b'1'));
        if !well_formed {
            return ValidationResult::rejected(
                report.node_id.clone(),
                RejectionReason::InvalidBitstringFormat,
            );
        }

        let histogram = histogram(&report.bitstrings);
        let agreement_rate = agreement_rate(&report.bitstrings);

        let mut trust_score = agreement_rate;
        if let Some(fidelity) = report.biometric_fidelity {
            if (0.0..=1.0).contains(&fidelity) {
                trust_score *= 0.5 + 0.5 * fidelity;
            } else {
                warn!(
                    node = %report.node_id,
                    fidelity,
                    "Ignoring out-of-range biometric fidelity"
                );
            }
        }

        let valid = agreement_rate >= self.expected_tolerance;
        debug!(
            node = %report.node_id,
            agreement_rate,
            trust_score,
            valid,
            "Report scored"
        );

        ValidationResult {
            node_id: report.node_id.clone(),
            valid,
            reason: if valid {
                None
            } else {
                Some(RejectionReason::LowAgreement)
            },
            agreement_rate,
            histogram,
            trust_score,
        }
    }

    /// Cluster-level means over every result, valid or not
    pub fn aggregate(results: &[ValidationResult]) -> AggregateMetrics {
        if results.is_empty() {
            return AggregateMetrics::default();
        }
        let n = results.len() as f64;
        AggregateMetrics {
            avg_agreement: results.iter().map(|r| r.agreement_rate).sum::<f64>() / n,
            avg_trust: results.iter().map(|r| r.trust_score).sum::<f64>() / n,
            num_valid: results.iter().filter(|r| r.valid).count(),
            num_reports: results.len(),
        }
    }
}

/// Occurrence count per distinct bit-string
pub fn histogram(bitstrings: &[String]) -> BTreeMap<String, u64> {
    let mut hist = BTreeMap::new();
    for s in bitstrings {
        *hist.entry(s.clone()).or_insert(0) += 1;
    }
    hist
}

/// True iff all characters are identical
pub fn is_uniform(bitstring: &str) -> bool {
    let mut bytes = bitstring.bytes();
    match bytes.next() {
        Some(first) => bytes.all(|b| b == first),
        None => true,
    }
}

/// Fraction of uniform bit-strings; 0 for an empty slice
pub fn agreement_rate(bitstrings: &[String]) -> f64 {
    if bitstrings.is_empty() {
        return 0.0;
    }
    bitstrings.iter().filter(|s| is_uniform(s)).count() as f64 / bitstrings.len() as f64
}

/// Mean of `z_i * z_j` (with `0 -> +1`, `1 -> -1`) for every shard pair.
///
/// Keys are `"i-j"` with `i < j`. Shots whose width differs from the first
/// shot are skipped.
pub fn pairwise_correlations(bitstrings: &[String]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let Some(first) = bitstrings.first() else {
        return out;
    };
    let width = first.len();
    let rows: Vec<Vec<i8>> = bitstrings
        .iter()
        .filter(|s| s.len() == width)
        .map(|s| s.bytes().map(|b| if b == b'1' { -1 } else { 1 }).collect())
        .collect();
    if rows.is_empty() {
        return out;
    }

    for i in 0..width {
        for j in (i + 1)..width {
            let sum: i64 = rows.iter().map(|row| (row[i] * row[j]) as i64).sum();
            out.insert(format!("{}-{}", i, j), sum as f64 / rows.len() as f64);
        }
    }
    out
}

/// Build a verification hint from a diagnostic sample
pub fn summarize_sample(sample: &[String]) -> VerificationHint {
    VerificationHint::Sampled {
        agreement_rate: agreement_rate(sample),
        sample_histogram: histogram(sample)
            .into_iter()
            .take(HINT_HISTOGRAM_ENTRIES)
            .collect(),
        pairwise_correlations: pairwise_correlations(sample),
    }
}
