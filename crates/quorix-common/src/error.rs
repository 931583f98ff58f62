//! Error types for the Quorix consensus core
//!
//! Provides a unified error type and domain-specific error variants.
//! Per-report validation outcomes are not errors; they travel inside
//! [`crate::ValidationResult`] as a [`crate::RejectionReason`].

use thiserror::Error;

/// Result type alias using QuorixError
pub type Result<T> = std::result::Result<T, QuorixError>;

/// Unified error type for Quorix operations
#[derive(Debug, Error)]
pub enum QuorixError {
    // Offer errors
    #[error("Offer error: {0}")]
    Offer(#[from] OfferError),

    // Temporal lock errors
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    // Crypto errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    // Round errors
    #[error("Round error: {0}")]
    Round(#[from] RoundError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Offer creation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OfferError {
    #[error("At least 2 distinct shard indices are required, got {count}")]
    InsufficientShards { count: usize },

    #[error("Invalid offer kind '{0}': expected pair or group")]
    InvalidKind(String),

    #[error("Offer ttl out of range: {0}")]
    InvalidTtl(String),
}

/// Temporal lock errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LockError {
    #[error("Invalid ISO-8601 timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid lock duration: {0}s")]
    InvalidDuration(f64),
}

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported signing method: {0}")]
    UnsupportedSigningMethod(String),

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("No key material registered for node {node_id}")]
    MissingKeyMaterial { node_id: String },

    #[error("Key material for node {node_id} uses {actual}, registry expects {expected}")]
    MethodMismatch {
        node_id: String,
        expected: String,
        actual: String,
    },
}

/// Consensus round errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoundError {
    #[error("Round timed out for offer {offer_id}: {collected} of {expected} reports collected")]
    RoundTimeout {
        offer_id: String,
        collected: usize,
        expected: usize,
    },

    #[error("Round cancelled for offer {offer_id}")]
    RoundCancelled { offer_id: String },

    #[error("Measurement failed for {node_id}: {reason}")]
    MeasurementFailed { node_id: String, reason: String },

    #[error("Node task failed: {0}")]
    NodeTaskFailed(String),

    #[error("Node keys not initialised; call init_node_keys first")]
    KeysNotInitialised,
}

impl From<serde_json::Error> for QuorixError {
    fn from(err: serde_json::Error) -> Self {
        QuorixError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuorixError::Offer(OfferError::InvalidKind("triplet".to_string()));
        assert!(err.to_string().contains("triplet"));
    }

    #[test]
    fn test_round_timeout_display() {
        let err = RoundError::RoundTimeout {
            offer_id: "abc".to_string(),
            collected: 2,
            expected: 5,
        };
        assert!(err.to_string().contains("2 of 5"));
    }
}
