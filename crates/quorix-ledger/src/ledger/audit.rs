//! Round audit trail
//!
//! A round emits events to an optional [`AuditSink`] after each state
//! transition that matters to an outside observer:
//! - offer created
//! - each report validated, with its full result and a BLAKE3 digest of
//!   its canonical bytes
//! - round decided, with the full decision, or aborted with the error
//!   that stopped it
//!
//! Sinks are write-only from the round's point of view; a failing sink is
//! logged and never fails the round.

use async_trait::async_trait;
use parking_lot::RwLock;
use quorix_common::{ClusterDecision, Result, ShardIndex, ValidationResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events recorded for a consensus round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuditEvent {
    /// Offer reserved for the round
    OfferCreated {
        round_id: Uuid,
        offer_id: String,
        shard_indices: Vec<ShardIndex>,
        timestamp: i64,
    },
    /// One node's report went through validation
    ReportValidated {
        round_id: Uuid,
        offer_id: String,
        /// Hex BLAKE3 digest of the canonical report bytes
        report_digest: String,
        result: ValidationResult,
        timestamp: i64,
    },
    /// Quorum decision reached
    RoundDecided {
        round_id: Uuid,
        offer_id: String,
        decision: Box<ClusterDecision>,
        timestamp: i64,
    },
    /// Round stopped before a decision
    RoundAborted {
        round_id: Uuid,
        offer_id: String,
        error: String,
        timestamp: i64,
    },
}

impl AuditEvent {
    pub fn round_id(&self) -> Uuid {
        match self {
            AuditEvent::OfferCreated { round_id, .. }
            | AuditEvent::ReportValidated { round_id, .. }
            | AuditEvent::RoundDecided { round_id, .. }
            | AuditEvent::RoundAborted { round_id, .. } => *round_id,
        }
    }

    pub fn offer_id(&self) -> &str {
        match self {
            AuditEvent::OfferCreated { offer_id, .. }
            | AuditEvent::ReportValidated { offer_id, .. }
            | AuditEvent::RoundDecided { offer_id, .. }
            | AuditEvent::RoundAborted { offer_id, .. } => offer_id,
        }
    }
}

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

/// In-process sink, mostly for tests and the demo binary
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Events belonging to one round, in recording order
    pub fn events_for_round(&self, round_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.round_id() == round_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorix_common::RejectionReason;

    #[tokio::test]
    async fn test_memory_sink_filters_by_round() {
        let sink = MemoryAuditSink::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        for round_id in [a, b, a] {
            sink.record(AuditEvent::RoundAborted {
                round_id,
                offer_id: "ff".repeat(16),
                error: "cancelled".to_string(),
                timestamp: 0,
            })
            .await
            .unwrap();
        }
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_for_round(a).len(), 2);
    }

    #[test]
    fn test_event_json_shape() {
        let event = AuditEvent::ReportValidated {
            round_id: Uuid::nil(),
            offer_id: "ab".to_string(),
            report_digest: "00".repeat(32),
            result: ValidationResult::rejected("node-3", RejectionReason::EmptyPayload),
            timestamp: 1,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ReportValidated");
        assert_eq!(json["data"]["result"]["node_id"], "node-3");
        assert_eq!(json["data"]["result"]["reason"], "empty_payload");
    }
}
