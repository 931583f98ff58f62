//! Consensus round orchestration
//!
//! One round runs through:
//! 1. Created: keys checked, round id assigned
//! 2. OfferRequested: offer reserved from the oracle, locks snapshotted
//! 3. ReportsCollected: every node measured, signed and validated in its
//!    own task, bounded by the offer TTL
//! 4. Validated: per-node verdicts aggregated
//! 5. Decided: quorum policy applied
//!
//! Nothing is published mid-round. A timeout, cancellation, or failed
//! measurement aborts the whole round; there is no partial aggregation.

use crate::consensus::keys::KeyRegistry;
use crate::consensus::quorum::QuorumPolicy;
use crate::ledger::audit::{AuditEvent, AuditSink};
use crate::locks::TemporalLockManager;
use crate::measurement::{MeasurementRequest, MeasurementSource};
use crate::oracle::{OfferOptions, ResourceOracle};
use crate::verification::ReportValidator;
use chrono::{DateTime, Utc};
use quorix_common::{
    node_id_for, Clock, ClusterDecision, CryptoError, DecisionMetrics, NodeKeyMaterial,
    QuorixError, RejectionReason, Result, RoundError, ShardIndex, SystemClock, ValidationResult,
    WitnessReport, DEFAULT_EXPECTED_TOLERANCE, DEFAULT_OFFER_TTL_SECS, MAX_BITSTRINGS_PER_NODE,
    META_LOCKED_UNTIL, META_PARTICIPATING,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Round configuration
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Agreement threshold for reports and for the cluster average
    pub expected_tolerance: f64,
    /// Offer TTL (and collection deadline) when the request sets none
    pub default_ttl: Duration,
    /// Shots requested per node when the request sets none
    pub repetitions: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            expected_tolerance: DEFAULT_EXPECTED_TOLERANCE,
            default_ttl: Duration::from_secs(DEFAULT_OFFER_TTL_SECS),
            repetitions: 1024,
        }
    }
}

/// Parameters of one round
#[derive(Debug, Clone)]
pub struct RoundRequest {
    pub shard_indices: Vec<ShardIndex>,
    /// `pair`/`bell` or `group`/`ghz`
    pub kind: String,
    pub ttl: Option<Duration>,
    pub run_quick_verify: bool,
    pub repetitions: Option<usize>,
}

impl RoundRequest {
    pub fn new(shard_indices: Vec<ShardIndex>, kind: impl Into<String>) -> Self {
        Self {
            shard_indices,
            kind: kind.into(),
            ttl: None,
            run_quick_verify: false,
            repetitions: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_quick_verify(mut self, enabled: bool) -> Self {
        self.run_quick_verify = enabled;
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = Some(repetitions);
        self
    }
}

/// Output of one node task
struct NodeOutcome {
    position: usize,
    digest: [u8; 32],
    result: ValidationResult,
}

/// Everything a node task needs, cloned per node
#[derive(Clone)]
struct NodeContext {
    source: Arc<dyn MeasurementSource>,
    keys: Arc<KeyRegistry>,
    validator: Arc<ReportValidator>,
    collected: Arc<AtomicUsize>,
    shard_count: usize,
    repetitions: usize,
    kind: quorix_common::OfferKind,
}

/// Orchestrator for consensus rounds
pub struct ConsensusRound {
    config: RoundConfig,
    policy: QuorumPolicy,
    oracle: Arc<ResourceOracle>,
    source: Arc<dyn MeasurementSource>,
    keys: Option<Arc<KeyRegistry>>,
    locks: Option<Arc<TemporalLockManager>>,
    audit: Option<Arc<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
}

impl ConsensusRound {
    /// Create an orchestrator; fails on a tolerance outside `[0, 1]`
    pub fn new(
        config: RoundConfig,
        oracle: Arc<ResourceOracle>,
        source: Arc<dyn MeasurementSource>,
    ) -> Result<Self> {
        let policy = QuorumPolicy::new(config.expected_tolerance)?;
        Ok(Self {
            config,
            policy,
            oracle,
            source,
            keys: None,
            locks: None,
            audit: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// Consult `locks` when snapshotting participation
    pub fn with_lock_manager(mut self, locks: Arc<TemporalLockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub fn key_registry(&self) -> Option<&Arc<KeyRegistry>> {
        self.keys.as_ref()
    }

    /// Bind the round to a signing method and generate keys for `shard_indices`.
    ///
    /// An unknown tag fails before anything changes. Calling again with the
    /// same method only adds keys for new nodes.
    pub fn init_node_keys(&mut self, signing_method: &str, shard_indices: &[ShardIndex]) -> Result<()> {
        let fresh = KeyRegistry::from_tag(signing_method)?;
        let registry = match &self.keys {
            Some(existing) if existing.method() == fresh.method() => existing.clone(),
            Some(existing) => {
                warn!(
                    from = %existing.method(),
                    to = %fresh.method(),
                    "Signing method changed; replacing key registry"
                );
                Arc::new(fresh)
            }
            None => Arc::new(fresh),
        };
        registry.generate_for(shard_indices.iter().map(|i| node_id_for(*i)));
        self.keys = Some(registry);
        Ok(())
    }

    /// Install externally supplied material for one node
    pub fn register_node_key(&mut self, node_id: impl Into<String>, material: NodeKeyMaterial) -> Result<()> {
        let registry = self
            .keys
            .get_or_insert_with(|| Arc::new(KeyRegistry::new(material.method())));
        registry.register(node_id, material)
    }

    /// Run one round to a decision
    pub async fn start_round(&self, request: RoundRequest) -> Result<ClusterDecision> {
        self.start_round_with_cancel(request, std::future::pending()).await
    }

    /// Run one round, aborting with `RoundCancelled` once `cancel` resolves.
    ///
    /// In-flight node tasks are aborted on cancellation, timeout, or when
    /// the returned future is dropped. The offer is left to expire.
    #[instrument(
        skip(self, request, cancel),
        fields(round_id = tracing::field::Empty, offer_id = tracing::field::Empty)
    )]
    pub async fn start_round_with_cancel<F>(&self, request: RoundRequest, cancel: F) -> Result<ClusterDecision>
    where
        F: Future<Output = ()> + Send,
    {
        let round_id = Uuid::now_v7();
        let span = tracing::Span::current();
        span.record("round_id", tracing::field::display(round_id));
        debug!(state = "created", shards = request.shard_indices.len(), "Round state");

        let keys = self.keys.clone().ok_or(RoundError::KeysNotInitialised)?;
        if let Some(missing) = request
            .shard_indices
            .iter()
            .map(|i| node_id_for(*i))
            .find(|node_id| !keys.contains(node_id))
        {
            return Err(CryptoError::MissingKeyMaterial { node_id: missing }.into());
        }

        let ttl = request.ttl.unwrap_or(self.config.default_ttl);
        let offer = self
            .oracle
            .create_offer(
                &request.shard_indices,
                &request.kind,
                ttl,
                OfferOptions {
                    run_quick_verify: request.run_quick_verify,
                    persist: true,
                },
            )
            .await?;
        // collection deadline runs from offer creation
        let deadline = tokio::time::Instant::now() + offer.ttl;
        span.record("offer_id", tracing::field::display(&offer.offer_id));
        let validator = Arc::new(ReportValidator::new(
            offer.shard_indices.len(),
            self.config.expected_tolerance,
        )?);

        self.emit(AuditEvent::OfferCreated {
            round_id,
            offer_id: offer.offer_id.clone(),
            shard_indices: offer.shard_indices.clone(),
            timestamp: self.clock.now().timestamp_millis(),
        })
        .await;

        let locked: HashMap<ShardIndex, DateTime<Utc>> = self
            .locks
            .as_ref()
            .map(|locks| locks.locked_among(&offer.shard_indices, locks.now()))
            .unwrap_or_default()
            .into_iter()
            .collect();
        let locked_shards: Vec<ShardIndex> = offer
            .shard_indices
            .iter()
            .copied()
            .filter(|i| locked.contains_key(i))
            .collect();
        debug!(state = "offer_requested", locked = locked_shards.len(), "Round state");

        let expected = offer.shard_indices.len();
        let ctx = NodeContext {
            source: self.source.clone(),
            keys,
            validator,
            collected: Arc::new(AtomicUsize::new(0)),
            shard_count: expected,
            repetitions: request.repetitions.unwrap_or(self.config.repetitions),
            kind: offer.kind,
        };
        let collected = ctx.collected.clone();

        let mut tasks = JoinSet::new();
        for (position, shard) in offer.shard_indices.iter().copied().enumerate() {
            let ctx = ctx.clone();
            let locked_until = locked.get(&shard).copied();
            tasks.spawn(async move { run_node(ctx, position, shard, locked_until).await });
        }

        let collection = async move {
            let mut outcomes: Vec<Option<NodeOutcome>> = (0..expected).map(|_| None).collect();
            while let Some(joined) = tasks.join_next().await {
                let outcome = joined.map_err(|e| RoundError::NodeTaskFailed(e.to_string()))??;
                let position = outcome.position;
                outcomes[position] = Some(outcome);
            }
            Ok::<_, QuorixError>(outcomes.into_iter().flatten().collect::<Vec<_>>())
        };

        tokio::pin!(cancel);
        let outcome = tokio::select! {
            res = tokio::time::timeout_at(deadline, collection) => match res {
                Ok(inner) => inner,
                Err(_) => Err(RoundError::RoundTimeout {
                    offer_id: offer.offer_id.clone(),
                    collected: collected.load(Ordering::SeqCst),
                    expected,
                }
                .into()),
            },
            _ = &mut cancel => Err(RoundError::RoundCancelled {
                offer_id: offer.offer_id.clone(),
            }
            .into()),
        };

        let outcomes = match outcome {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(error = %e, "Round aborted");
                self.emit(AuditEvent::RoundAborted {
                    round_id,
                    offer_id: offer.offer_id.clone(),
                    error: e.to_string(),
                    timestamp: self.clock.now().timestamp_millis(),
                })
                .await;
                return Err(e);
            }
        };
        debug!(state = "reports_collected", reports = outcomes.len(), "Round state");

        let mut raw_reports = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            self.emit(AuditEvent::ReportValidated {
                round_id,
                offer_id: offer.offer_id.clone(),
                report_digest: hex::encode(outcome.digest),
                result: outcome.result.clone(),
                timestamp: self.clock.now().timestamp_millis(),
            })
            .await;
            raw_reports.push(outcome.result);
        }

        let aggregate = ReportValidator::aggregate(&raw_reports);
        debug!(state = "validated", ?aggregate, "Round state");

        let achieved = self.policy.decide(&aggregate);
        let decision = ClusterDecision {
            round_id,
            achieved,
            metrics: DecisionMetrics {
                offer_id: offer.offer_id.clone(),
                offer_snapshot: offer,
                aggregate,
            },
            raw_reports,
            locked_shards,
            decided_at: self.clock.now(),
        };

        info!(
            achieved,
            avg_agreement = aggregate.avg_agreement,
            avg_trust = aggregate.avg_trust,
            num_valid = aggregate.num_valid,
            num_reports = aggregate.num_reports,
            "Round decided"
        );
        if self.audit.is_some() {
            self.emit(AuditEvent::RoundDecided {
                round_id,
                offer_id: decision.metrics.offer_id.clone(),
                decision: Box::new(decision.clone()),
                timestamp: decision.decided_at.timestamp_millis(),
            })
            .await;
        }

        Ok(decision)
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(sink) = &self.audit {
            if let Err(e) = sink.record(event).await {
                warn!(error = %e, "Audit sink rejected event");
            }
        }
    }
}

impl std::fmt::Debug for ConsensusRound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusRound")
            .field("config", &self.config)
            .field("signing_method", &self.keys.as_ref().map(|k| k.method()))
            .field("has_locks", &self.locks.is_some())
            .field("has_audit", &self.audit.is_some())
            .finish()
    }
}

/// Measure, sign, and validate one node
async fn run_node(
    ctx: NodeContext,
    position: usize,
    shard: ShardIndex,
    locked_until: Option<DateTime<Utc>>,
) -> Result<NodeOutcome> {
    let node_id = node_id_for(shard);
    let measurement = ctx
        .source
        .measure(&MeasurementRequest {
            node_id: node_id.clone(),
            shard_index: shard,
            shard_count: ctx.shard_count,
            repetitions: ctx.repetitions,
            kind: ctx.kind,
        })
        .await?;

    let mut bitstrings = measurement.bitstrings;
    if bitstrings.len() > MAX_BITSTRINGS_PER_NODE {
        warn!(
            node_id = %node_id,
            returned = bitstrings.len(),
            kept = MAX_BITSTRINGS_PER_NODE,
            "Truncating oversized measurement"
        );
        bitstrings.truncate(MAX_BITSTRINGS_PER_NODE);
    }

    let mut report = WitnessReport::new(node_id, bitstrings, measurement.timestamp);
    report.biometric_fidelity = measurement.biometric_fidelity;
    report = match locked_until {
        Some(until) => report
            .with_metadata(META_PARTICIPATING, "false")
            .with_metadata(META_LOCKED_UNTIL, until.to_rfc3339()),
        None => report.with_metadata(META_PARTICIPATING, "true"),
    };

    let signed = ctx.keys.sign(report)?;
    let digest = signed.report.canonical_digest();

    let result = if ctx.keys.is_registered_signer(&signed) {
        ctx.validator.validate_signed(&signed, ctx.keys.method())
    } else {
        ValidationResult::rejected(signed.report.node_id.clone(), RejectionReason::InvalidSignature)
    };

    ctx.collected.fetch_add(1, Ordering::SeqCst);
    Ok(NodeOutcome {
        position,
        digest,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{NodeProfile, SyntheticSource};

    fn round(source: SyntheticSource) -> ConsensusRound {
        ConsensusRound::new(
            RoundConfig::default(),
            Arc::new(ResourceOracle::default()),
            Arc::new(source),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_requires_keys() {
        let round = round(SyntheticSource::new());
        let err = round
            .start_round(RoundRequest::new(vec![0, 1, 2], "group"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuorixError::Round(RoundError::KeysNotInitialised)));
    }

    #[tokio::test]
    async fn test_missing_node_key_fails_before_offer() {
        let oracle = Arc::new(ResourceOracle::default());
        let mut round = ConsensusRound::new(
            RoundConfig::default(),
            oracle.clone(),
            Arc::new(SyntheticSource::new()),
        )
        .unwrap();
        round.init_node_keys("hmac", &[0, 1]).unwrap();

        let err = round
            .start_round(RoundRequest::new(vec![0, 1, 2], "group"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QuorixError::Crypto(CryptoError::MissingKeyMaterial { ref node_id }) if node_id == "node-2"
        ));
        assert_eq!(oracle.ledger_len(), 0);
    }

    #[tokio::test]
    async fn test_results_follow_offer_order() {
        let source = SyntheticSource::new()
            .with_delay(3, Duration::from_millis(20))
            .with_profile(1, NodeProfile::Empty);
        let mut round = round(source);
        round.init_node_keys("ecdsa", &[3, 1, 2]).unwrap();

        let decision = round
            .start_round(RoundRequest::new(vec![3, 1, 2], "ghz").with_repetitions(16))
            .await
            .unwrap();

        let ids: Vec<_> = decision.raw_reports.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids, vec!["node-3", "node-1", "node-2"]);
        assert_eq!(decision.raw_reports[1].reason, Some(RejectionReason::EmptyPayload));
        // 2 of 3 valid, but the empty report drags the mean to 2/3
        assert!(!decision.achieved);
    }

    #[tokio::test]
    async fn test_oversized_measurement_is_truncated() {
        let mut round = round(SyntheticSource::new().with_max_bitstrings(1000));
        round.init_node_keys("hmac", &[0, 1]).unwrap();

        let decision = round
            .start_round(RoundRequest::new(vec![0, 1], "pair").with_repetitions(1000))
            .await
            .unwrap();
        assert!(decision
            .raw_reports
            .iter()
            .all(|r| r.histogram.values().sum::<u64>() == MAX_BITSTRINGS_PER_NODE as u64));
        assert!(decision.achieved);
    }

    #[tokio::test]
    async fn test_register_node_key_creates_registry() {
        let mut round = round(SyntheticSource::new());
        round
            .register_node_key("node-0", NodeKeyMaterial::generate(quorix_common::SigningMethod::Hmac))
            .unwrap();
        round
            .register_node_key("node-1", NodeKeyMaterial::generate(quorix_common::SigningMethod::Hmac))
            .unwrap();

        let decision = round
            .start_round(RoundRequest::new(vec![0, 1], "pair").with_repetitions(8))
            .await
            .unwrap();
        assert!(decision.achieved);
    }
}
