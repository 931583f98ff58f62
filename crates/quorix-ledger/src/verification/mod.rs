//! Verification module
//!
//! This module provides:
//! - Signature checks over canonical report bytes
//! - Structural scoring of witness reports
//! - Aggregation of per-node verdicts

pub mod validator;

pub use validator::{agreement_rate, histogram, pairwise_correlations, ReportValidator};
