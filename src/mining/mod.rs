//! Proof-of-work puzzle and the block miner

pub mod miner;
pub mod pow;

pub use miner::{Miner, MiningStats};
pub use pow::ProofOfWork;
