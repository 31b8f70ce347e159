//! Proof-of-work: find a nonce whose SHA-256 digest over the block
//! contents falls strictly below `2^(256 - difficulty)`.

use crate::core::merkle::merkle_root;
use crate::core::Transaction;
use crate::crypto::hash::Hash256;
use crate::{LedgerError, Result};

pub const DEFAULT_DIFFICULTY: u32 = 18;
pub const MIN_DIFFICULTY: u32 = 1;
pub const MAX_DIFFICULTY: u32 = 255;

pub fn check_difficulty(difficulty: u32) -> Result<u32> {
    if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        Ok(difficulty)
    } else {
        Err(LedgerError::InvalidDifficulty(difficulty))
    }
}

/// Big-endian encoding of `2^(256 - difficulty)`.
pub fn difficulty_to_target(difficulty: u32) -> Result<[u8; 32]> {
    let difficulty = check_difficulty(difficulty)?;
    let bit = (256 - difficulty) as usize;

    let mut target = [0u8; 32];
    target[31 - bit / 8] = 1 << (bit % 8);
    Ok(target)
}

/// Big-endian byte arrays of equal width order exactly like the integers
/// they encode.
pub fn meets_target(digest: &Hash256, target: &[u8; 32]) -> bool {
    digest.as_bytes() < target
}

#[derive(Debug, Clone)]
pub struct ProofOfWork {
    prev_digest: Hash256,
    transactions_root: Hash256,
    difficulty: u32,
    target: [u8; 32],
}

impl ProofOfWork {
    pub fn new(prev_digest: Hash256, transactions: &[Transaction], difficulty: u32) -> Result<Self> {
        let ids: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
        let transactions_root = merkle_root(&ids)?;
        let target = difficulty_to_target(difficulty)?;

        Ok(Self {
            prev_digest,
            transactions_root,
            difficulty,
            target,
        })
    }

    pub fn target(&self) -> &[u8; 32] {
        &self.target
    }

    pub fn transactions_root(&self) -> Hash256 {
        self.transactions_root
    }

    /// `prev_digest || transactions root || nonce (u64 BE) || difficulty (u64 BE)`
    pub fn prepare(&self, nonce: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 32 + 8 + 8);
        data.extend_from_slice(self.prev_digest.as_bytes());
        data.extend_from_slice(self.transactions_root.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&u64::from(self.difficulty).to_be_bytes());
        data
    }

    pub fn digest(&self, nonce: u64) -> Hash256 {
        Hash256::hash(&self.prepare(nonce))
    }

    pub fn run(&self) -> Result<(u64, Hash256)> {
        let mut nonce = 0u64;
        loop {
            let digest = self.digest(nonce);
            if meets_target(&digest, &self.target) {
                log::debug!("⛏️  Found nonce {} -> {}", nonce, digest);
                return Ok((nonce, digest));
            }
            nonce = nonce
                .checked_add(1)
                .ok_or(LedgerError::NonceExhausted(self.difficulty))?;
        }
    }

    /// Recomputes the digest for `nonce`; it must meet the target and equal
    /// the digest the block was stored under.
    pub fn validate(&self, nonce: u64, claimed: &Hash256) -> bool {
        let digest = self.digest(nonce);
        meets_target(&digest, &self.target) && digest == *claimed
    }
}
