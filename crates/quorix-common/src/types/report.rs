//! Witness reports
//!
//! A [`WitnessReport`] is a node's claimed measurement payload for one
//! round. Nodes sign its canonical encoding (see [`crate::crypto::canonical`])
//! and the resulting [`SignedReport`] lives only for the duration of a round.

use crate::crypto::canonical;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Measurement payload produced by one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessReport {
    pub node_id: String,

    /// Fixed-width strings over `{0,1}`, one per measurement shot
    pub bitstrings: Vec<String>,

    /// Seconds since the UNIX epoch
    pub timestamp: f64,

    /// Opaque fidelity score in `[0,1]`, if a biometric source supplied one
    pub biometric_fidelity: Option<f64>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl WitnessReport {
    pub fn new(node_id: impl Into<String>, bitstrings: Vec<String>, timestamp: f64) -> Self {
        Self {
            node_id: node_id.into(),
            bitstrings,
            timestamp,
            biometric_fidelity: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_fidelity(mut self, fidelity: f64) -> Self {
        self.biometric_fidelity = Some(fidelity);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deterministic byte encoding used for signing
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical::encode_report(self)
    }

    /// BLAKE3 digest of the canonical encoding, for audit records
    pub fn canonical_digest(&self) -> [u8; 32] {
        *blake3::hash(&self.canonical_bytes()).as_bytes()
    }
}

/// Report plus the signature over its canonical bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedReport {
    pub report: WitnessReport,

    /// DER ECDSA signature or raw HMAC tag
    pub signature: Vec<u8>,

    /// SEC1 public key (ECDSA) or shared secret (HMAC)
    pub signer_key_material: Vec<u8>,
}
