//! Consensus module
//!
//! Provides:
//! - Per-node signing keys bound to one signing method
//! - Quorum decision over aggregate validation metrics
//! - Round orchestration from offer to decision

pub mod keys;
pub mod quorum;
pub mod round;

pub use keys::KeyRegistry;
pub use quorum::QuorumPolicy;
pub use round::{ConsensusRound, RoundConfig, RoundRequest};
