//! Measurement source seam
//!
//! The consensus core never produces bit-strings itself. A
//! [`MeasurementSource`] is injected into the oracle (for quick
//! verification hints) and into every round (for per-node reports).
//! [`SyntheticSource`] is a deterministic implementation producing ideal
//! GHZ-style outcomes, with per-node profiles to model faulty nodes.

use crate::verification::validator::summarize_sample;
use async_trait::async_trait;
use quorix_common::{
    Clock, OfferKind, QuorixError, Result, RoundError, ShardIndex, SystemClock, VerificationHint,
    MAX_BITSTRINGS_PER_NODE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Shots sampled for a quick verification hint
const QUICK_VERIFY_SHOTS: usize = 128;

/// What a round asks of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementRequest {
    pub node_id: String,
    pub shard_index: ShardIndex,
    /// Width of every returned bit-string
    pub shard_count: usize,
    pub repetitions: usize,
    pub kind: OfferKind,
}

/// Raw node output before it is wrapped into a signed report
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub bitstrings: Vec<String>,
    /// Seconds since the UNIX epoch
    pub timestamp: f64,
    pub biometric_fidelity: Option<f64>,
}

/// Supplier of node measurements
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Produce up to `repetitions` bit-strings for one node
    async fn measure(&self, request: &MeasurementRequest) -> Result<Measurement>;

    /// Small diagnostic sample attached to offers on request
    async fn quick_verify(&self, shard_count: usize, repetitions: usize) -> Result<VerificationHint> {
        let _ = (shard_count, repetitions);
        Err(QuorixError::Internal(
            "quick verification not supported by this source".to_string(),
        ))
    }
}

/// Behaviour of a synthetic node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeProfile {
    /// Every shot all-0 or all-1, alternating
    Ideal,
    /// The given fraction of shots carry a single flipped bit
    Noisy { disagreement: f64 },
    /// Bit-strings one character wider than the round's shard count
    Malformed,
    /// No bit-strings at all
    Empty,
    /// The node never answers successfully
    Failing,
}

/// Deterministic measurement source
#[derive(Debug)]
pub struct SyntheticSource {
    profiles: HashMap<ShardIndex, NodeProfile>,
    fidelities: HashMap<ShardIndex, f64>,
    delays: HashMap<ShardIndex, Duration>,
    max_bitstrings: usize,
    clock: Arc<dyn Clock>,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
            fidelities: HashMap::new(),
            delays: HashMap::new(),
            max_bitstrings: MAX_BITSTRINGS_PER_NODE,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_profile(mut self, shard: ShardIndex, profile: NodeProfile) -> Self {
        self.profiles.insert(shard, profile);
        self
    }

    pub fn with_fidelity(mut self, shard: ShardIndex, fidelity: f64) -> Self {
        self.fidelities.insert(shard, fidelity);
        self
    }

    /// Delay a node's answer, to exercise round deadlines
    pub fn with_delay(mut self, shard: ShardIndex, delay: Duration) -> Self {
        self.delays.insert(shard, delay);
        self
    }

    pub fn with_max_bitstrings(mut self, max: usize) -> Self {
        self.max_bitstrings = max;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn profile(&self, shard: ShardIndex) -> &NodeProfile {
        self.profiles.get(&shard).unwrap_or(&NodeProfile::Ideal)
    }

    fn timestamp(&self) -> f64 {
        self.clock.now().timestamp_micros() as f64 / 1_000_000.0
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Alternating all-0 / all-1 shots
fn ideal_shots(width: usize, shots: usize) -> Vec<String> {
    (0..shots)
        .map(|i| if i % 2 == 0 { "0" } else { "1" }.repeat(width))
        .collect()
}

/// Uniform shot with its last bit flipped
fn disagreeing_shot(width: usize, base: char) -> String {
    let flipped = if base == '0' { '1' } else { '0' };
    let mut shot: String = std::iter::repeat(base).take(width.saturating_sub(1)).collect();
    shot.push(flipped);
    shot
}

#[async_trait]
impl MeasurementSource for SyntheticSource {
    async fn measure(&self, request: &MeasurementRequest) -> Result<Measurement> {
        if let Some(delay) = self.delays.get(&request.shard_index) {
            tokio::time::sleep(*delay).await;
        }

        let width = request.shard_count;
        let shots = request.repetitions.min(self.max_bitstrings);

        let bitstrings = match self.profile(request.shard_index) {
            NodeProfile::Ideal => ideal_shots(width, shots),
            NodeProfile::Noisy { disagreement } => {
                let noisy = ((shots as f64) * disagreement.clamp(0.0, 1.0)).round() as usize;
                let mut out = ideal_shots(width, shots);
                for (i, shot) in out.iter_mut().take(noisy).enumerate() {
                    *shot = disagreeing_shot(width, if i % 2 == 0 { '0' } else { '1' });
                }
                out
            }
            NodeProfile::Malformed => ideal_shots(width + 1, shots),
            NodeProfile::Empty => Vec::new(),
            NodeProfile::Failing => {
                return Err(RoundError::MeasurementFailed {
                    node_id: request.node_id.clone(),
                    reason: "synthetic node configured to fail".to_string(),
                }
                .into())
            }
        };

        debug!(
            node = %request.node_id,
            shots = bitstrings.len(),
            width,
            "Synthetic measurement produced"
        );

        Ok(Measurement {
            bitstrings,
            timestamp: self.timestamp(),
            biometric_fidelity: self.fidelities.get(&request.shard_index).copied(),
        })
    }

    async fn quick_verify(&self, shard_count: usize, repetitions: usize) -> Result<VerificationHint> {
        let sample = ideal_shots(shard_count, repetitions.min(QUICK_VERIFY_SHOTS));
        Ok(summarize_sample(&sample))
    }
}
