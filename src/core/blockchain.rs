use crate::core::block::CandidateBlock;
use crate::core::transaction::{PriorTransactions, BLOCK_REWARD};
use crate::core::{Block, Transaction};
use crate::crypto::hash::{Hash160, Hash256};
use crate::crypto::keys::PrivateKey;
use crate::mining::pow::check_difficulty;
use crate::storage::database::{abort, decode, prefixed_key, BLOCK_PREFIX, TIP_KEY};
use crate::storage::Database;
use crate::{LedgerError, Result};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::collections::HashSet;
use std::sync::Arc;

/// What `append` did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A block with this digest was already stored; nothing changed.
    AlreadyKnown,
    /// Stored, but not higher than the tip.
    Stored,
    /// Stored and now the tip.
    NewTip,
}

/// Durable, digest-keyed block store with a tip pointer.
#[derive(Debug, Clone)]
pub struct Blockchain {
    db: Arc<Database>,
    difficulty: u32,
}

fn block_key(digest: &[u8]) -> Vec<u8> {
    prefixed_key(BLOCK_PREFIX, digest)
}

impl Blockchain {
    /// Initializes a new chain whose genesis coinbase pays `genesis_recipient`.
    pub fn create(db: Arc<Database>, genesis_recipient: &Hash160, memo: &str, difficulty: u32) -> Result<Self> {
        if Self::exists(&db)? {
            return Err(LedgerError::ChainExists);
        }

        let chain = Self {
            db,
            difficulty: check_difficulty(difficulty)?,
        };

        let coinbase = Transaction::new_coinbase(genesis_recipient, memo)?;
        let genesis = Block::genesis(coinbase, difficulty)?;
        chain.append(&genesis)?;

        log::info!("🌱 Genesis block {} created", genesis.digest);
        Ok(chain)
    }

    pub fn open(db: Arc<Database>, difficulty: u32) -> Result<Self> {
        if !Self::exists(&db)? {
            return Err(LedgerError::ChainNotFound);
        }
        if db.was_recovered() {
            log::debug!("📂 Opened existing ledger store");
        }

        let chain = Self {
            db,
            difficulty: check_difficulty(difficulty)?,
        };
        let tip = chain.tip()?;
        if tip.difficulty != chain.difficulty {
            log::warn!(
                "⚠️  Chain tip was mined at difficulty {}, new blocks must use {}",
                tip.difficulty,
                chain.difficulty
            );
        }
        Ok(chain)
    }

    pub fn open_or_create(db: Arc<Database>, genesis_recipient: &Hash160, memo: &str, difficulty: u32) -> Result<Self> {
        if Self::exists(&db)? {
            Self::open(db, difficulty)
        } else {
            Self::create(db, genesis_recipient, memo, difficulty)
        }
    }

    pub fn exists(db: &Database) -> Result<bool> {
        Ok(db.get(TIP_KEY)?.is_some())
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Difficulty new blocks are mined at.
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn last_digest(&self) -> Result<Hash256> {
        let tip = self.db.get(TIP_KEY)?.ok_or(LedgerError::ChainNotFound)?;
        Hash256::from_slice(&tip).ok_or_else(|| LedgerError::Corrupt("tip pointer is not a digest".to_string()))
    }

    pub fn tip(&self) -> Result<Block> {
        self.get_block(&self.last_digest()?)
    }

    pub fn height(&self) -> Result<u64> {
        Ok(self.tip()?.height)
    }

    pub fn get_block(&self, digest: &Hash256) -> Result<Block> {
        self.db
            .get_decoded(&block_key(digest.as_bytes()))?
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", digest)))
    }

    pub fn contains_block(&self, digest: &Hash256) -> Result<bool> {
        Ok(self.db.get(&block_key(digest.as_bytes()))?.is_some())
    }

    /// Stores `block` and advances the tip if its height beats the current
    /// tip's. Idempotent.
    pub fn append(&self, block: &Block) -> Result<AppendOutcome> {
        self.check_admissible(block)?;

        let outcome = self.db.tree().transaction(|txn| Self::append_in(txn, block))?;
        log_outcome(block, outcome);
        Ok(outcome)
    }

    /// The body of `append`, run inside a caller-owned store transaction.
    pub(crate) fn append_in(
        txn: &TransactionalTree,
        block: &Block,
    ) -> ConflictableTransactionResult<AppendOutcome, LedgerError> {
        let key = block_key(block.digest.as_bytes());
        if txn.get(&key)?.is_some() {
            return Ok(AppendOutcome::AlreadyKnown);
        }

        if block.is_genesis() {
            if block.height != 0 {
                return Err(abort(LedgerError::InvalidBlock(format!(
                    "genesis {} claims height {}",
                    block.digest, block.height
                ))));
            }
        } else {
            let parent_data = txn.get(block_key(block.prev_digest.as_bytes()))?.ok_or_else(|| {
                abort(LedgerError::InvalidBlock(format!(
                    "parent {} of block {} is unknown",
                    block.prev_digest, block.digest
                )))
            })?;
            let parent: Block = decode(&parent_data).map_err(abort)?;
            if parent.height.checked_add(1) != Some(block.height) {
                return Err(abort(LedgerError::InvalidBlock(format!(
                    "block {} claims height {} on a parent at height {}",
                    block.digest, block.height, parent.height
                ))));
            }
        }

        txn.insert(key, block.serialize().map_err(abort)?)?;

        let advance = match txn.get(TIP_KEY)? {
            None => true,
            Some(tip_digest) => {
                let tip_data = txn.get(block_key(&tip_digest))?.ok_or_else(|| {
                    abort(LedgerError::Corrupt("tip pointer references a missing block".to_string()))
                })?;
                let tip: Block = decode(&tip_data).map_err(abort)?;
                block.height > tip.height
            }
        };

        if advance {
            txn.insert(TIP_KEY, block.digest.as_bytes().to_vec())?;
            Ok(AppendOutcome::NewTip)
        } else {
            Ok(AppendOutcome::Stored)
        }
    }

    /// Walks from the tip back to genesis. Each call starts at the current tip.
    pub fn iter(&self) -> Result<BlockIterator<'_>> {
        Ok(BlockIterator {
            chain: self,
            next_digest: Some(self.last_digest()?),
        })
    }

    pub fn block_digests(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.digest)).collect()
    }

    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            if let Some(tx) = block?.transactions.into_iter().find(|tx| tx.id == *id) {
                return Ok(tx);
            }
        }
        Err(LedgerError::NotFound(format!("transaction {}", id)))
    }

    /// Resolves every transaction `tx` spends from in a single chain walk.
    pub fn resolve_inputs(&self, tx: &Transaction) -> Result<PriorTransactions> {
        let mut wanted: HashSet<Hash256> = tx.inputs.iter().map(|input| input.prev_tx_id).collect();
        let mut resolved = PriorTransactions::new();

        if tx.is_coinbase() || wanted.is_empty() {
            return Ok(resolved);
        }

        for block in self.iter()? {
            for prev in block?.transactions {
                if wanted.remove(&prev.id) {
                    resolved.insert(prev.id, prev);
                }
            }
            if wanted.is_empty() {
                return Ok(resolved);
            }
        }

        match wanted.into_iter().next() {
            Some(missing) => Err(LedgerError::MissingPriorTransaction(missing)),
            None => Ok(resolved),
        }
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, private_key: &PrivateKey) -> Result<()> {
        let prev_txs = self.resolve_inputs(tx)?;
        tx.sign(private_key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.resolve_inputs(tx)?;
        tx.verify(&prev_txs)
    }

    /// Verifies `pending` against the chain and frames the next block on
    /// top of the current tip.
    pub fn prepare_candidate(&self, pending: Vec<Transaction>) -> Result<CandidateBlock> {
        let mut seen = HashSet::new();
        for tx in &pending {
            if !seen.insert(tx.id) {
                return Err(LedgerError::InvalidTransaction(format!("{} appears twice", tx.id)));
            }
            self.check_pending(tx)?;
        }

        let tip = self.tip()?;
        let height = tip
            .height
            .checked_add(1)
            .ok_or_else(|| LedgerError::InvalidBlock(format!("no height left above tip {}", tip.digest)))?;
        CandidateBlock::new(pending, tip.digest, height, self.difficulty)
    }

    /// Signatures must verify and a transaction may not create more value
    /// than it spends. Coinbases mint at most the block reward.
    fn check_pending(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            let minted = tx.total_output_value()?;
            if minted > BLOCK_REWARD {
                return Err(LedgerError::InvalidTransaction(format!(
                    "coinbase {} mints {} (reward is {})",
                    tx.id, minted, BLOCK_REWARD
                )));
            }
            return Ok(());
        }

        if tx.inputs.is_empty() {
            return Err(LedgerError::InvalidTransaction(format!("{} has no inputs", tx.id)));
        }

        let prev_txs = match self.resolve_inputs(tx) {
            Ok(prev_txs) => prev_txs,
            Err(LedgerError::MissingPriorTransaction(prev)) => {
                return Err(LedgerError::InvalidTransaction(format!("{} spends unknown transaction {}", tx.id, prev)));
            }
            Err(e) => return Err(e),
        };

        if !tx.verify(&prev_txs)? {
            return Err(LedgerError::InvalidTransaction(format!("{} failed signature verification", tx.id)));
        }

        let spent = tx.input_value(&prev_txs)?;
        let created = tx.total_output_value()?;
        if created > spent {
            return Err(LedgerError::InvalidTransaction(format!(
                "{} creates {} from inputs worth {}",
                tx.id, created, spent
            )));
        }
        Ok(())
    }

    pub fn mine_and_append(&self, pending: Vec<Transaction>) -> Result<Block> {
        let block = self.prepare_candidate(pending)?.mine()?;
        self.append(&block)?;

        log::info!("⛏️  Mined block {} at height {}", block.digest, block.height);
        Ok(block)
    }

    /// Checks proof of work and height linkage of every block from the tip
    /// down to genesis. Returns the number of blocks checked.
    pub fn audit(&self) -> Result<usize> {
        let mut checked = 0;
        let mut child_height: Option<u64> = None;

        for block in self.iter()? {
            let block = block?;
            self.check_admissible(&block)?;
            if let Some(child_height) = child_height {
                if block.height.checked_add(1) != Some(child_height) {
                    return Err(LedgerError::InvalidBlock(format!(
                        "height gap below {}: {} -> {}",
                        block.digest, block.height, child_height
                    )));
                }
            }
            if block.is_genesis() && block.height != 0 {
                return Err(LedgerError::InvalidBlock(format!("genesis {} at height {}", block.digest, block.height)));
            }
            child_height = Some(block.height);
            checked += 1;
        }

        Ok(checked)
    }

    /// Rejects blocks mined at another difficulty than this chain's, or
    /// failing their own proof of work.
    pub(crate) fn check_admissible(&self, block: &Block) -> Result<()> {
        if block.difficulty != self.difficulty {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} mined at difficulty {}, chain requires {}",
                block.digest, block.difficulty, self.difficulty
            )));
        }
        if !block.validate() {
            return Err(LedgerError::InvalidBlock(format!("proof of work fails for {}", block.digest)));
        }
        Ok(())
    }
}

pub(crate) fn log_outcome(block: &Block, outcome: AppendOutcome) {
    match outcome {
        AppendOutcome::NewTip => log::debug!("💾 Block {} stored as tip at height {}", block.digest, block.height),
        AppendOutcome::Stored => log::warn!("⚠️  Block {} at height {} stored off the main chain", block.digest, block.height),
        AppendOutcome::AlreadyKnown => log::debug!("Block {} already stored", block.digest),
    }
}

pub struct BlockIterator<'a> {
    chain: &'a Blockchain,
    next_digest: Option<Hash256>,
}

impl Iterator for BlockIterator<'_> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let digest = self.next_digest.take()?;
        match self.chain.get_block(&digest) {
            Ok(block) => {
                if !block.is_genesis() {
                    self.next_digest = Some(block.prev_digest);
                }
                Some(Ok(block))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
