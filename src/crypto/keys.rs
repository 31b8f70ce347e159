use crate::crypto::hash::{Hash160, Hash256};
use crate::crypto::signatures::{Signature, SignatureUtils};
use crate::{LedgerError, Result};
use secp256k1::{PublicKey as Secp256k1PublicKey, Secp256k1, SecretKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

const ADDRESS_VERSION: u8 = 0x00;
const WIF_VERSION: u8 = 0x80;
const CHECKSUM_LENGTH: usize = 4;

#[derive(Debug, Clone)]
pub struct PrivateKey {
    key: SecretKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    key: Vec<u8>, // Compressed SEC1 encoding
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl PrivateKey {
    pub fn new() -> Result<Self> {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);

        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| LedgerError::Crypto(format!("Failed to create private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(LedgerError::Crypto("Private key must be 32 bytes".to_string()));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| LedgerError::Crypto(format!("Invalid private key: {}", e)))?;

        Ok(Self { key: secret_key })
    }

    /// Decode WIF (Wallet Import Format).
    pub fn from_wif(wif: &str) -> Result<Self> {
        let decoded = bs58::decode(wif).into_vec()
            .map_err(|e| LedgerError::Crypto(format!("Invalid WIF format: {}", e)))?;

        if decoded.len() != 33 + CHECKSUM_LENGTH || decoded[0] != WIF_VERSION {
            return Err(LedgerError::Crypto("Invalid WIF format".to_string()));
        }

        let (data, checksum) = decoded.split_at(33);
        if &checksum_of(data)[..] != checksum {
            return Err(LedgerError::Crypto("Invalid WIF checksum".to_string()));
        }

        Self::from_bytes(&data[1..])
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.secret_bytes()
    }

    pub fn to_wif(&self) -> String {
        let mut data = Vec::with_capacity(33 + CHECKSUM_LENGTH);
        data.push(WIF_VERSION);
        data.extend_from_slice(&self.key.secret_bytes());

        let checksum = checksum_of(&data);
        data.extend_from_slice(&checksum);

        bs58::encode(data).into_string()
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let public_key = Secp256k1PublicKey::from_secret_key(&secp, &self.key);

        PublicKey {
            key: public_key.serialize().to_vec(),
        }
    }

    pub fn sign(&self, message: &Hash256) -> Result<Signature> {
        SignatureUtils::sign(&self.key, message)
    }
}

impl PublicKey {
    pub fn to_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn hash160(&self) -> Hash160 {
        Hash160::hash_sha256(&self.key)
    }

    pub fn to_address(&self) -> String {
        hash160_to_address(&self.hash160())
    }

    pub fn verify(&self, message: &Hash256, signature: &Signature) -> bool {
        SignatureUtils::verify_raw(&self.key, message, &signature.to_bytes())
    }
}

impl KeyPair {
    pub fn new() -> Result<Self> {
        Self::from_private_key(PrivateKey::new()?)
    }

    pub fn from_private_key(private_key: PrivateKey) -> Result<Self> {
        let public_key = private_key.public_key();

        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn address(&self) -> String {
        self.public_key.to_address()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.key))
    }
}

fn checksum_of(payload: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let hash = Hash256::double_hash(payload);
    let mut checksum = [0u8; CHECKSUM_LENGTH];
    checksum.copy_from_slice(&hash.as_bytes()[..CHECKSUM_LENGTH]);
    checksum
}

/// Base58(version || hash160 || checksum).
pub fn hash160_to_address(hash160: &Hash160) -> String {
    let mut data = Vec::with_capacity(21 + CHECKSUM_LENGTH);
    data.push(ADDRESS_VERSION);
    data.extend_from_slice(hash160.as_bytes());

    let checksum = checksum_of(&data);
    data.extend_from_slice(&checksum);

    bs58::encode(data).into_string()
}

pub fn address_to_hash160(address: &str) -> Result<Hash160> {
    let decoded = bs58::decode(address).into_vec()
        .map_err(|_| LedgerError::InvalidAddress(address.to_string()))?;

    if decoded.len() != 21 + CHECKSUM_LENGTH || decoded[0] != ADDRESS_VERSION {
        return Err(LedgerError::InvalidAddress(address.to_string()));
    }

    let (data, checksum) = decoded.split_at(21);
    if &checksum_of(data)[..] != checksum {
        return Err(LedgerError::InvalidAddress(address.to_string()));
    }

    Hash160::from_slice(&data[1..]).ok_or_else(|| LedgerError::InvalidAddress(address.to_string()))
}

pub fn is_valid_address(address: &str) -> bool {
    address_to_hash160(address).is_ok()
}
