//! Cryptographic primitives for Quorix
//!
//! This module provides:
//! - Canonical report encoding shared by signer and verifier
//! - ECDSA P-256 and HMAC-SHA256 node key material

pub mod canonical;
pub mod signing;

// Re-export commonly used items
pub use signing::{key_material_matches, verify_signature, NodeKeyMaterial, SigningMethod};
