//! Per-node signing keys
//!
//! The registry is bound to one [`SigningMethod`] at construction; the
//! method tag is parsed there and nowhere else. Keys are generated once per
//! node and never rotated.

use dashmap::DashMap;
use quorix_common::crypto::key_material_matches;
use quorix_common::{
    CryptoError, NodeKeyMaterial, Result, SignedReport, SigningMethod, WitnessReport,
};
use std::str::FromStr;
use tracing::{debug, info};

/// Node id -> signing material
#[derive(Debug)]
pub struct KeyRegistry {
    method: SigningMethod,
    keys: DashMap<String, NodeKeyMaterial>,
}

impl KeyRegistry {
    pub fn new(method: SigningMethod) -> Self {
        Self {
            method,
            keys: DashMap::new(),
        }
    }

    /// Build from a method tag (`ecdsa` or `hmac`)
    pub fn from_tag(tag: &str) -> Result<Self> {
        Ok(Self::new(SigningMethod::from_str(tag)?))
    }

    pub fn method(&self) -> SigningMethod {
        self.method
    }

    /// Generate material for every node that does not have any yet
    pub fn generate_for<I, S>(&self, node_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut generated = 0;
        for node_id in node_ids {
            self.keys.entry(node_id.into()).or_insert_with(|| {
                generated += 1;
                NodeKeyMaterial::generate(self.method)
            });
        }
        info!(method = %self.method, generated, total = self.keys.len(), "Node keys generated");
        generated
    }

    /// Install externally supplied material; it must use the registry's method
    pub fn register(&self, node_id: impl Into<String>, material: NodeKeyMaterial) -> Result<()> {
        let node_id = node_id.into();
        if material.method() != self.method {
            return Err(CryptoError::MethodMismatch {
                node_id,
                expected: self.method.to_string(),
                actual: material.method().to_string(),
            }
            .into());
        }
        debug!(node = %node_id, "Node key registered");
        self.keys.insert(node_id, material);
        Ok(())
    }

    /// Sign a report's canonical bytes with the node's key
    pub fn sign(&self, report: WitnessReport) -> Result<SignedReport> {
        let key = self
            .keys
            .get(&report.node_id)
            .ok_or_else(|| CryptoError::MissingKeyMaterial {
                node_id: report.node_id.clone(),
            })?;
        let signature = key.sign(&report.canonical_bytes())?;
        let signer_key_material = key.verification_material();
        drop(key);

        Ok(SignedReport {
            report,
            signature,
            signer_key_material,
        })
    }

    pub fn verification_material(&self, node_id: &str) -> Option<Vec<u8>> {
        self.keys.get(node_id).map(|key| key.verification_material())
    }

    /// True iff the key material carried by `signed` is the one registered
    /// for its node
    pub fn is_registered_signer(&self, signed: &SignedReport) -> bool {
        self.verification_material(&signed.report.node_id)
            .map(|expected| key_material_matches(&expected, &signed.signer_key_material))
            .unwrap_or(false)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.keys.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorix_common::QuorixError;

    fn report(node: &str) -> WitnessReport {
        WitnessReport::new(node, vec!["00".to_string(), "11".to_string()], 1.5)
    }

    #[test]
    fn test_unknown_tag_fails_fast() {
        let err = KeyRegistry::from_tag("rsa").unwrap_err();
        assert!(matches!(
            err,
            QuorixError::Crypto(CryptoError::UnsupportedSigningMethod(_))
        ));
        assert_eq!(KeyRegistry::from_tag("HMAC").unwrap().method(), SigningMethod::Hmac);
    }

    #[test]
    fn test_keys_are_not_rotated() {
        let registry = KeyRegistry::new(SigningMethod::Ecdsa);
        assert_eq!(registry.generate_for(["node-0", "node-1"]), 2);
        let before = registry.verification_material("node-0").unwrap();

        assert_eq!(registry.generate_for(["node-0", "node-2"]), 1);
        assert_eq!(registry.verification_material("node-0").unwrap(), before);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_sign_requires_material() {
        let registry = KeyRegistry::new(SigningMethod::Hmac);
        let err = registry.sign(report("node-5")).unwrap_err();
        assert!(matches!(
            err,
            QuorixError::Crypto(CryptoError::MissingKeyMaterial { .. })
        ));
    }

    #[test]
    fn test_register_checks_method() {
        let registry = KeyRegistry::new(SigningMethod::Hmac);
        let err = registry
            .register("node-0", NodeKeyMaterial::generate(SigningMethod::Ecdsa))
            .unwrap_err();
        assert!(matches!(err, QuorixError::Crypto(CryptoError::MethodMismatch { .. })));

        let material = NodeKeyMaterial::hmac_from_secret(&[7u8; 32]).unwrap();
        registry.register("node-0", material).unwrap();
        assert_eq!(registry.verification_material("node-0"), Some(vec![7u8; 32]));
    }

    #[test]
    fn test_registered_signer_check() {
        let registry = KeyRegistry::new(SigningMethod::Ecdsa);
        registry.generate_for(["node-0"]);
        let signed = registry.sign(report("node-0")).unwrap();
        assert!(registry.is_registered_signer(&signed));

        let mut forged = signed.clone();
        forged.signer_key_material =
            NodeKeyMaterial::generate(SigningMethod::Ecdsa).verification_material();
        assert!(!registry.is_registered_signer(&forged));
    }
}
