//! Cryptographic primitives: digests, secp256k1 keys and signatures

pub mod keys;
pub mod signatures;
pub mod hash;

pub use keys::{PrivateKey, PublicKey, KeyPair};
pub use signatures::Signature;
pub use hash::{Hash160, Hash256};
