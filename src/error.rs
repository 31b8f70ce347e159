use crate::crypto::hash::Hash256;
use sled::transaction::TransactionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Prior transaction not found: {0}")]
    MissingPriorTransaction(Hash256),

    #[error("Store failure: {0}")]
    Store(#[from] sled::Error),

    #[error("Encoding failure: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("UTXO index diverged from ledger: {0}")]
    IndexDiverged(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("Mining error: {0}")]
    Mining(String),

    #[error("Nonce space exhausted at difficulty {0}")]
    NonceExhausted(u32),

    #[error("A block needs at least one transaction")]
    EmptyBlock,

    #[error("Invalid difficulty: {0} (expected 1..=255)")]
    InvalidDifficulty(u32),

    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Blockchain already exists")]
    ChainExists,

    #[error("No existing blockchain found")]
    ChainNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Recoverable outcomes the caller is expected to handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_) | LedgerError::InsufficientFunds { .. } | LedgerError::InvalidAmount(_)
        )
    }
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => LedgerError::Store(e),
        }
    }
}
