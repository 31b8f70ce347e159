use crate::core::merkle::MerkleTree;
use crate::core::Transaction;
use crate::crypto::hash::Hash256;
use crate::mining::pow::{check_difficulty, ProofOfWork};
use crate::storage::database::{decode, encode};
use crate::{LedgerError, Result};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A mined block. `digest` is the proof-of-work output and the block's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub timestamp: i64,
    pub prev_digest: Hash256,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub difficulty: u32,
    pub digest: Hash256,
}

/// Block contents before the nonce search.
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub height: u64,
    pub timestamp: i64,
    pub prev_digest: Hash256,
    pub transactions: Vec<Transaction>,
    pub difficulty: u32,
}

impl CandidateBlock {
    pub fn new(transactions: Vec<Transaction>, prev_digest: Hash256, height: u64, difficulty: u32) -> Result<Self> {
        if transactions.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }

        Ok(Self {
            height,
            timestamp: Utc::now().timestamp(),
            prev_digest,
            transactions,
            difficulty: check_difficulty(difficulty)?,
        })
    }

    pub fn proof_of_work(&self) -> Result<ProofOfWork> {
        ProofOfWork::new(self.prev_digest, &self.transactions, self.difficulty)
    }

    /// Runs the nonce search; CPU-bound and touches no shared state.
    pub fn mine(self) -> Result<Block> {
        let (nonce, digest) = self.proof_of_work()?.run()?;

        Ok(Block {
            height: self.height,
            timestamp: self.timestamp,
            prev_digest: self.prev_digest,
            transactions: self.transactions,
            nonce,
            difficulty: self.difficulty,
            digest,
        })
    }
}

impl Block {
    pub fn new(transactions: Vec<Transaction>, prev_digest: Hash256, height: u64, difficulty: u32) -> Result<Self> {
        CandidateBlock::new(transactions, prev_digest, height, difficulty)?.mine()
    }

    pub fn genesis(coinbase: Transaction, difficulty: u32) -> Result<Self> {
        Self::new(vec![coinbase], Hash256::zero(), 0, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_digest.is_zero()
    }

    pub fn hash_transactions(&self) -> Result<Hash256> {
        let ids = self.transactions.iter().map(|tx| tx.id).collect();
        Ok(MerkleTree::new(ids)?.root())
    }

    pub fn proof_of_work(&self) -> Result<ProofOfWork> {
        ProofOfWork::new(self.prev_digest, &self.transactions, self.difficulty)
    }

    /// Re-checks the proof of work. Blocks that cannot even be framed for
    /// hashing (no transactions, bad difficulty) are invalid.
    pub fn validate(&self) -> bool {
        match self.proof_of_work() {
            Ok(pow) => pow.validate(self.nonce, &self.digest),
            Err(_) => false,
        }
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn contains_transaction(&self, id: &Hash256) -> bool {
        self.transactions.iter().any(|tx| tx.id == *id)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        decode(data)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = Utc
            .timestamp_opt(self.timestamp, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.timestamp.to_string());

        writeln!(f, "============ Block {} ============", self.digest)?;
        writeln!(f, "Height:     {}", self.height)?;
        writeln!(f, "Time:       {}", time)?;
        writeln!(f, "Prev. hash: {}", self.prev_digest)?;
        writeln!(f, "Nonce:      {}", self.nonce)?;
        writeln!(f, "Difficulty: {}", self.difficulty)?;
        writeln!(f, "PoW:        {}", self.validate())?;
        for tx in &self.transactions {
            write!(f, "{}", tx)?;
        }
        Ok(())
    }
}
