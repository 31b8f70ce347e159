use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};
use secp256k1::{ecdsa::Signature as Secp256k1Signature, Message, PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

/// Compact (r || s) ECDSA signature over secp256k1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
}

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(LedgerError::Crypto("Invalid signature length".to_string()));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);

        Ok(Self { r, s })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        bytes
    }

    pub fn from_secp256k1(signature: Secp256k1Signature) -> Self {
        let compact = signature.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[0..32]);
        s.copy_from_slice(&compact[32..64]);

        Self { r, s }
    }

    pub fn to_secp256k1(&self) -> Result<Secp256k1Signature> {
        Secp256k1Signature::from_compact(&self.to_bytes())
            .map_err(|e| LedgerError::Crypto(format!("Invalid signature: {}", e)))
    }
}

// Signature creation and verification utilities
pub struct SignatureUtils;

impl SignatureUtils {
    pub fn sign(secret_key: &SecretKey, message_hash: &Hash256) -> Result<Signature> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest_slice(message_hash.as_bytes())
            .map_err(|e| LedgerError::Crypto(format!("Invalid message: {}", e)))?;

        let signature = secp.sign_ecdsa(&message, secret_key);
        Ok(Signature::from_secp256k1(signature))
    }

    /// Malformed key or signature bytes verify as `false`, never as an error.
    pub fn verify_raw(public_key: &[u8], message_hash: &Hash256, signature: &[u8]) -> bool {
        let Ok(public_key) = Secp256k1PublicKey::from_slice(public_key) else {
            return false;
        };
        let Ok(signature) = Secp256k1Signature::from_compact(signature) else {
            return false;
        };
        let Ok(message) = Message::from_digest_slice(message_hash.as_bytes()) else {
            return false;
        };

        Secp256k1::verification_only()
            .verify_ecdsa(&message, &signature, &public_key)
            .is_ok()
    }
}
