//! Persistent key-value store for blocks, the tip pointer and the UTXO index

pub mod database;

pub use database::Database;
