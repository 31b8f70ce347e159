use crate::crypto::hash::Hash160;
use crate::crypto::keys::{KeyPair, PrivateKey, PublicKey};
use crate::Result;

/// A spending identity: one secp256k1 key pair. Storing wallets is left to
/// the caller.
#[derive(Debug, Clone)]
pub struct Wallet {
    key_pair: KeyPair,
}

impl Wallet {
    pub fn new() -> Result<Self> {
        Ok(Self {
            key_pair: KeyPair::new()?,
        })
    }

    pub fn from_private_key(private_key: PrivateKey) -> Result<Self> {
        Ok(Self {
            key_pair: KeyPair::from_private_key(private_key)?,
        })
    }

    pub fn from_wif(wif: &str) -> Result<Self> {
        Self::from_private_key(PrivateKey::from_wif(wif)?)
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.key_pair.private_key
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public_key
    }

    pub fn public_key_hash(&self) -> Hash160 {
        self.key_pair.public_key.hash160()
    }

    pub fn address(&self) -> String {
        self.key_pair.address()
    }
}
