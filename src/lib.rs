//! utxo-ledger - a single-node UTXO ledger engine
//!
//! This library implements the consensus and storage core of a
//! proof-of-work blockchain:
//! - SHA-256 proof-of-work mining and validation
//! - Merkle commitment of each block's transactions
//! - UTXO-based transactions with secp256k1 signatures
//! - A sled-backed chain store with an incrementally maintained UTXO index
//! - A small operator CLI

pub mod core;
pub mod crypto;
pub mod wallet;
pub mod mining;
pub mod storage;
pub mod cli;
pub mod error;
pub mod config;

pub use error::{LedgerError, Result};
