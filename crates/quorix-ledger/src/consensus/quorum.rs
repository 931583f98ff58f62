//! Quorum decision over aggregate metrics

use quorix_common::{AggregateMetrics, QuorixError, Result, DEFAULT_EXPECTED_TOLERANCE};

/// Agreement threshold plus a simple valid-report majority
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuorumPolicy {
    expected_tolerance: f64,
}

impl QuorumPolicy {
    pub fn new(expected_tolerance: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&expected_tolerance) {
            return Err(QuorixError::Config(format!(
                "expected_tolerance must be within [0, 1], got {}",
                expected_tolerance
            )));
        }
        Ok(Self { expected_tolerance })
    }

    pub fn expected_tolerance(&self) -> f64 {
        self.expected_tolerance
    }

    /// `avg_agreement >= tolerance` and `num_valid >= ceil(num_reports / 2)`.
    /// An empty round never reaches consensus.
    pub fn decide(&self, metrics: &AggregateMetrics) -> bool {
        metrics.num_reports > 0
            && metrics.avg_agreement >= self.expected_tolerance
            && metrics.num_valid >= metrics.majority_threshold()
    }
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            expected_tolerance: DEFAULT_EXPECTED_TOLERANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(avg_agreement: f64, num_valid: usize, num_reports: usize) -> AggregateMetrics {
        AggregateMetrics {
            avg_agreement,
            avg_trust: avg_agreement,
            num_valid,
            num_reports,
        }
    }

    #[test]
    fn test_minority_of_valid_reports_fails() {
        let policy = QuorumPolicy::default();
        assert!(!policy.decide(&metrics(0.95, 4, 10)));
        assert!(policy.decide(&metrics(0.95, 5, 10)));
    }

    #[test]
    fn test_odd_report_count_majority() {
        let policy = QuorumPolicy::default();
        assert!(!policy.decide(&metrics(0.95, 2, 5)));
        assert!(policy.decide(&metrics(0.95, 3, 5)));
    }

    #[test]
    fn test_low_average_fails() {
        let policy = QuorumPolicy::default();
        assert!(!policy.decide(&metrics(0.85, 10, 10)));
        assert!(policy.decide(&metrics(0.9, 10, 10)));
    }

    #[test]
    fn test_empty_round() {
        assert!(!QuorumPolicy::default().decide(&AggregateMetrics::default()));
        assert!(QuorumPolicy::new(1.1).is_err());
    }
}
