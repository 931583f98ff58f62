//! Node key material and report signatures
//!
//! Two methods are supported, selected once when a key registry is built:
//! - `ecdsa`: P-256 with SHA-256, DER-encoded signatures, SEC1 public keys
//! - `hmac`: HMAC-SHA256 over a per-node shared secret
//!
//! Verification never panics and never returns an error: any malformed key,
//! signature, or mismatch simply fails verification.

use crate::error::CryptoError;
use hmac::{Hmac, Mac};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length of generated HMAC secrets in bytes
pub const HMAC_SECRET_LEN: usize = 32;

/// Closed set of report signing methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMethod {
    Ecdsa,
    Hmac,
}

impl FromStr for SigningMethod {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ecdsa" => Ok(SigningMethod::Ecdsa),
            "hmac" => Ok(SigningMethod::Hmac),
            _ => Err(CryptoError::UnsupportedSigningMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for SigningMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SigningMethod::Ecdsa => write!(f, "ecdsa"),
            SigningMethod::Hmac => write!(f, "hmac"),
        }
    }
}

/// Signing material held for one node
#[derive(Clone)]
pub enum NodeKeyMaterial {
    Ecdsa(SigningKey),
    Hmac(Vec<u8>),
}

impl std::fmt::Debug for NodeKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKeyMaterial::Ecdsa(key) => f
                .debug_struct("Ecdsa")
                .field("public_key", &hex::encode(encode_public_key(key.verifying_key())))
                .finish(),
            NodeKeyMaterial::Hmac(_) => f.debug_struct("Hmac").finish_non_exhaustive(),
        }
    }
}

impl NodeKeyMaterial {
    /// Generate fresh material from the OS CSPRNG
    pub fn generate(method: SigningMethod) -> Self {
        match method {
            SigningMethod::Ecdsa => NodeKeyMaterial::Ecdsa(SigningKey::random(&mut OsRng)),
            SigningMethod::Hmac => {
                let mut secret = vec![0u8; HMAC_SECRET_LEN];
                OsRng.fill_bytes(&mut secret);
                NodeKeyMaterial::Hmac(secret)
            }
        }
    }

    /// Load a P-256 secret scalar (32 big-endian bytes)
    pub fn ecdsa_from_secret(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(NodeKeyMaterial::Ecdsa)
            .map_err(|e| CryptoError::InvalidKeyMaterial(format!("P-256 secret: {}", e)))
    }

    /// Wrap an externally supplied HMAC secret
    pub fn hmac_from_secret(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidKeyMaterial(
                "HMAC secret must not be empty".to_string(),
            ));
        }
        Ok(NodeKeyMaterial::Hmac(bytes.to_vec()))
    }

    pub fn method(&self) -> SigningMethod {
        match self {
            NodeKeyMaterial::Ecdsa(_) => SigningMethod::Ecdsa,
            NodeKeyMaterial::Hmac(_) => SigningMethod::Hmac,
        }
    }

    /// Bytes a verifier needs: the SEC1 public key, or the shared secret
    pub fn verification_material(&self) -> Vec<u8> {
        match self {
            NodeKeyMaterial::Ecdsa(key) => encode_public_key(key.verifying_key()),
            NodeKeyMaterial::Hmac(secret) => secret.clone(),
        }
    }

    /// Sign a canonical message
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            NodeKeyMaterial::Ecdsa(key) => {
                let signature: Signature = key
                    .try_sign(message)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            NodeKeyMaterial::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret)
                    .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
                mac.update(message);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

/// Verify `signature` over `message` with the given method and key material
pub fn verify_signature(
    method: SigningMethod,
    key_material: &[u8],
    message: &[u8],
    signature: &[u8],
) -> bool {
    match method {
        SigningMethod::Ecdsa => {
            let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(key_material) else {
                return false;
            };
            let Ok(signature) = Signature::from_der(signature) else {
                return false;
            };
            verifying_key.verify(message, &signature).is_ok()
        }
        SigningMethod::Hmac => {
            let Ok(mut mac) = HmacSha256::new_from_slice(key_material) else {
                return false;
            };
            mac.update(message);
            // verify_slice compares in constant time
            mac.verify_slice(signature).is_ok()
        }
    }
}

/// Constant-time equality for key material blobs
pub fn key_material_matches(expected: &[u8], provided: &[u8]) -> bool {
    expected.len() == provided.len() && bool::from(expected.ct_eq(provided))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MESSAGE: &[u8] = b"QRXR canonical report bytes";

    #[test]
    fn test_method_parsing() {
        assert_eq!("ecdsa".parse::<SigningMethod>().unwrap(), SigningMethod::Ecdsa);
        assert_eq!("HMAC".parse::<SigningMethod>().unwrap(), SigningMethod::Hmac);
        assert!(matches!(
            "rsa".parse::<SigningMethod>(),
            Err(CryptoError::UnsupportedSigningMethod(m)) if m == "rsa"
        ));
    }

    #[test]
    fn test_ecdsa_sign_verify() {
        let key = NodeKeyMaterial::generate(SigningMethod::Ecdsa);
        let signature = key.sign(MESSAGE).unwrap();
        let public = key.verification_material();

        assert_eq!(public.len(), 65);
        assert!(verify_signature(SigningMethod::Ecdsa, &public, MESSAGE, &signature));
        assert!(!verify_signature(SigningMethod::Ecdsa, &public, b"other", &signature));
    }

    #[test]
    fn test_hmac_sign_verify() {
        let key = NodeKeyMaterial::generate(SigningMethod::Hmac);
        let signature = key.sign(MESSAGE).unwrap();
        let secret = key.verification_material();

        assert_eq!(signature.len(), 32);
        assert!(verify_signature(SigningMethod::Hmac, &secret, MESSAGE, &signature));
        assert!(!verify_signature(SigningMethod::Hmac, b"wrong-secret", MESSAGE, &signature));
    }

    #[test]
    fn test_wrong_method_fails_closed() {
        let key = NodeKeyMaterial::generate(SigningMethod::Hmac);
        let signature = key.sign(MESSAGE).unwrap();
        assert!(!verify_signature(
            SigningMethod::Ecdsa,
            &key.verification_material(),
            MESSAGE,
            &signature
        ));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let key = NodeKeyMaterial::generate(SigningMethod::Ecdsa);
        assert!(!verify_signature(
            SigningMethod::Ecdsa,
            &key.verification_material(),
            MESSAGE,
            &[0u8; 7]
        ));
    }

    #[test]
    fn test_ecdsa_from_secret_is_stable() {
        let secret = [7u8; 32];
        let a = NodeKeyMaterial::ecdsa_from_secret(&secret).unwrap();
        let b = NodeKeyMaterial::ecdsa_from_secret(&secret).unwrap();
        assert_eq!(a.verification_material(), b.verification_material());
        assert!(NodeKeyMaterial::ecdsa_from_secret(&[0u8; 32]).is_err());
        assert!(NodeKeyMaterial::hmac_from_secret(&[]).is_err());
    }

    #[test]
    fn test_key_material_matches() {
        assert!(key_material_matches(b"abc", b"abc"));
        assert!(!key_material_matches(b"abc", b"abd"));
        assert!(!key_material_matches(b"abc", b"abcd"));
    }

    #[test]
    fn test_debug_hides_hmac_secret() {
        let key = NodeKeyMaterial::hmac_from_secret(b"super-secret").unwrap();
        assert!(!format!("{:?}", key).contains("super"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_any_flipped_byte_breaks_signature(
            message in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
            use_ecdsa in any::<bool>(),
        ) {
            let method = if use_ecdsa { SigningMethod::Ecdsa } else { SigningMethod::Hmac };
            let key = NodeKeyMaterial::generate(method);
            let signature = key.sign(&message).unwrap();
            let material = key.verification_material();
            prop_assert!(verify_signature(method, &material, &message, &signature));

            let mut tampered = message.clone();
            let i = index.index(tampered.len());
            tampered[i] ^= flip;
            prop_assert!(!verify_signature(method, &material, &tampered, &signature));
        }
    }
}
