//! # Quorix Ledger
//!
//! Quorum consensus and witness validation for Quorix.
//!
//! ## Components
//!
//! - **Locks**: per-shard temporal participation gates
//! - **Oracle**: time-bounded offers, single-use nonces, random bits
//! - **Verification**: report signature checks, scoring, aggregation
//! - **Consensus**: key registry, quorum policy, round orchestration
//! - **Ledger**: audit events emitted by rounds
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ConsensusRound                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │  Resource   │  │ Measurement │  │   ReportValidator   │  │
//! │  │   Oracle    │──│   Source    │──│ (signature, score)  │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! │  ┌─────────────┐                   ┌─────────────────────┐  │
//! │  │  Temporal   │                   │ QuorumPolicy, Audit │  │
//! │  │   Locks     │                   │        Sink         │  │
//! │  └─────────────┘                   └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod consensus;
pub mod ledger;
pub mod locks;
pub mod measurement;
pub mod oracle;
pub mod verification;

pub use consensus::{ConsensusRound, KeyRegistry, QuorumPolicy, RoundConfig, RoundRequest};
pub use ledger::{AuditEvent, AuditSink, MemoryAuditSink};
pub use locks::{LockReceipt, LockRequest, TemporalLockManager};
pub use measurement::{Measurement, MeasurementRequest, MeasurementSource, NodeProfile, SyntheticSource};
pub use oracle::{NonceStatus, OfferOptions, OracleConfig, RandomBits, ResourceOracle};
pub use verification::ReportValidator;
