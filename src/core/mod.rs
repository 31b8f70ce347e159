//! Core ledger components

pub mod block;
pub mod blockchain;
pub mod merkle;
pub mod transaction;
pub mod utxo;

pub use block::{Block, CandidateBlock};
pub use blockchain::{AppendOutcome, Blockchain};
pub use merkle::MerkleTree;
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::{UnspentOutput, UtxoEntry, UtxoSet};
