//! # Quorix Common
//!
//! Shared types, errors, and cryptographic primitives for the Quorix
//! consensus core.
//!
//! ## Core Types
//!
//! - [`ResourceOffer`]: time-bounded reservation of shard indices
//! - [`WitnessReport`] / [`SignedReport`]: a node's measurement payload
//! - [`ValidationResult`]: per-node verdict produced by the validator
//! - [`ClusterDecision`]: final output of a consensus round
//!
//! ## Crypto
//!
//! - [`crypto::canonical`]: deterministic report encoding shared by signing and verification
//! - [`crypto::signing`]: ECDSA P-256 and HMAC-SHA256 node key material

pub mod clock;
pub mod crypto;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::signing::{NodeKeyMaterial, SigningMethod};
pub use error::{CryptoError, LockError, OfferError, QuorixError, Result, RoundError};
pub use types::{
    decision::{AggregateMetrics, ClusterDecision, DecisionMetrics, RejectionReason, ValidationResult},
    offer::{OfferKind, OfferPage, ResourceOffer, ShardIndex, VerificationHint},
    report::{SignedReport, WitnessReport},
};

/// Quorix version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default agreement tolerance for a report to count as valid
pub const DEFAULT_EXPECTED_TOLERANCE: f64 = 0.9;

/// Minimum number of distinct shards in an offer
pub const MIN_OFFER_SHARDS: usize = 2;

/// Default offer time-to-live in seconds
pub const DEFAULT_OFFER_TTL_SECS: u64 = 30;

/// Maximum bit-strings a single node contributes to a round
pub const MAX_BITSTRINGS_PER_NODE: usize = 256;

/// Metadata key marking whether a node took part while unlocked
pub const META_PARTICIPATING: &str = "participating";

/// Metadata key carrying the unlock time of a locked node
pub const META_LOCKED_UNTIL: &str = "locked_until";

/// Node identifier for a shard index
pub fn node_id_for(shard: ShardIndex) -> String {
    format!("node-{}", shard)
}
