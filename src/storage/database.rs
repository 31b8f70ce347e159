use crate::{LedgerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::{Batch, Db, IVec, Tree};
use std::path::Path;

// All ledger state lives in one tree so a single store transaction can
// span blocks, the tip pointer and the UTXO entries.
const TREE_LEDGER: &str = "ledger";

/// Key prefix for blocks, followed by the 32-byte block digest.
pub const BLOCK_PREFIX: &[u8] = b"blk-";
/// Sentinel key holding the digest of the current tip.
pub const TIP_KEY: &[u8] = b"lh";
/// Key prefix for UTXO entries, followed by the 32-byte transaction id.
pub const UTXO_PREFIX: &[u8] = b"utxo-";

#[derive(Debug, Clone)]
pub struct Database {
    db: Db,
    ledger: Tree,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        let ledger = db.open_tree(TREE_LEDGER)?;
        Ok(Self { db, ledger })
    }

    pub fn tree(&self) -> &Tree {
        &self.ledger
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<IVec>> {
        Ok(self.ledger.get(key)?)
    }

    pub fn get_decoded<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.ledger.get(key)? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    /// Decoded `(key without prefix, value)` pairs in key order.
    pub fn scan_prefix_decoded<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        let mut items = Vec::new();
        for item in self.ledger.scan_prefix(prefix) {
            let (key, value) = item?;
            items.push((key[prefix.len()..].to_vec(), decode(&value)?));
        }
        Ok(items)
    }

    pub fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let mut count = 0;
        for item in self.ledger.scan_prefix(prefix).keys() {
            item?;
            count += 1;
        }
        Ok(count)
    }

    /// Batch that removes every key under `prefix`; callers extend it
    /// before applying so the reset and the rewrite land atomically.
    pub fn delete_prefix_batch(&self, prefix: &[u8]) -> Result<(Batch, usize)> {
        let mut batch = Batch::default();
        let mut removed = 0;
        for key in self.ledger.scan_prefix(prefix).keys() {
            batch.remove(key?);
            removed += 1;
        }
        Ok((batch, removed))
    }

    pub fn apply_batch(&self, batch: Batch) -> Result<()> {
        self.ledger.apply_batch(batch)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }
}

pub fn prefixed_key(prefix: &[u8], id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + id.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(id);
    key
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

/// Lifts a ledger error into a sled transaction abort.
pub fn abort(err: impl Into<LedgerError>) -> ConflictableTransactionError<LedgerError> {
    ConflictableTransactionError::Abort(err.into())
}
