//! Key pairs and addresses handed to the transaction layer

pub mod wallet;

pub use wallet::Wallet;
