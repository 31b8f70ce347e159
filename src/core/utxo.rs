use crate::core::block::CandidateBlock;
use crate::core::blockchain::{log_outcome, AppendOutcome, Blockchain};
use crate::core::{Block, Transaction, TxOutput};
use crate::crypto::hash::{Hash160, Hash256};
use crate::storage::database::{abort, decode, encode, prefixed_key, TIP_KEY, UTXO_PREFIX};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// An output still unspent, tagged with its position in the producing
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub index: u32,
    pub output: TxOutput,
}

/// Unspent outputs of one transaction, in output-position order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub outputs: Vec<UnspentOutput>,
}

impl UtxoEntry {
    pub fn contains(&self, index: u32) -> bool {
        self.outputs.iter().any(|unspent| unspent.index == index)
    }

    pub fn value(&self) -> u64 {
        self.outputs.iter().map(|unspent| unspent.output.value).sum()
    }
}

/// Output positions picked for spending, keyed by transaction id.
pub type SpendableSelection = BTreeMap<Hash256, Vec<u32>>;

fn entry_key(txid: &Hash256) -> Vec<u8> {
    prefixed_key(UTXO_PREFIX, txid.as_bytes())
}

fn output_position(output_index: i64, txid: &Hash256) -> Result<u32> {
    u32::try_from(output_index)
        .map_err(|_| LedgerError::IndexDiverged(format!("output index {} of {} is out of range", output_index, txid)))
}

/// Materialized view of the unspent outputs on the main chain, stored next
/// to the blocks so both can change in one store transaction.
#[derive(Debug, Clone)]
pub struct UtxoSet {
    chain: Arc<Blockchain>,
}

impl UtxoSet {
    pub fn new(chain: Arc<Blockchain>) -> Self {
        Self { chain }
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.chain
    }

    /// Drops every entry and recomputes the index from the chain in a single
    /// atomic batch. Returns the number of entries written.
    pub fn rebuild(&self) -> Result<usize> {
        let mut unspent: BTreeMap<Hash256, UtxoEntry> = BTreeMap::new();
        let mut spent: HashSet<(Hash256, i64)> = HashSet::new();

        // Walking newest first, an output is unspent iff no input seen so far
        // references it. Within a block later transactions go first.
        for block in self.chain.iter()? {
            for tx in block?.transactions.iter().rev() {
                for (index, output) in tx.outputs.iter().enumerate() {
                    let index = u32::try_from(index)
                        .map_err(|_| LedgerError::InvalidTransaction(format!("{} has too many outputs", tx.id)))?;
                    if !spent.contains(&(tx.id, i64::from(index))) {
                        unspent.entry(tx.id).or_default().outputs.push(UnspentOutput {
                            index,
                            output: output.clone(),
                        });
                    }
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.insert((input.prev_tx_id, input.output_index));
                    }
                }
            }
        }

        let db = self.chain.db();
        let (mut batch, removed) = db.delete_prefix_batch(UTXO_PREFIX)?;
        for (txid, entry) in &unspent {
            batch.insert(entry_key(txid), encode(entry)?);
        }
        db.apply_batch(batch)?;

        log::info!("🔄 Reindexed UTXO set: {} entries written, {} cleared", unspent.len(), removed);
        Ok(unspent.len())
    }

    /// Consumes the block's spent outputs and registers its new ones.
    pub fn apply_block(&self, block: &Block) -> Result<()> {
        self.chain.db().tree().transaction(|txn| Self::apply_in(txn, block))?;
        log::debug!("Indexed block {} ({} transactions)", block.digest, block.transactions.len());
        Ok(())
    }

    pub(crate) fn apply_in(txn: &TransactionalTree, block: &Block) -> ConflictableTransactionResult<(), LedgerError> {
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let key = entry_key(&input.prev_tx_id);
                    let data = txn.get(&key)?.ok_or_else(|| {
                        abort(LedgerError::IndexDiverged(format!(
                            "{} spends {} which has no unspent outputs",
                            tx.id, input.prev_tx_id
                        )))
                    })?;
                    let mut entry: UtxoEntry = decode(&data).map_err(abort)?;

                    let position = output_position(input.output_index, &input.prev_tx_id).map_err(abort)?;
                    let before = entry.outputs.len();
                    entry.outputs.retain(|unspent| unspent.index != position);
                    if entry.outputs.len() == before {
                        return Err(abort(LedgerError::IndexDiverged(format!(
                            "{} spends {}:{} which is not unspent",
                            tx.id, input.prev_tx_id, position
                        ))));
                    }

                    if entry.outputs.is_empty() {
                        txn.remove(key)?;
                    } else {
                        txn.insert(key, encode(&entry).map_err(abort)?)?;
                    }
                }
            }

            let key = entry_key(&tx.id);
            if txn.get(&key)?.is_some() {
                return Err(abort(LedgerError::IndexDiverged(format!("outputs of {} are already indexed", tx.id))));
            }

            let mut entry = UtxoEntry::default();
            for (index, output) in tx.outputs.iter().enumerate() {
                let index = u32::try_from(index)
                    .map_err(|_| abort(LedgerError::InvalidTransaction(format!("{} has too many outputs", tx.id))))?;
                entry.outputs.push(UnspentOutput {
                    index,
                    output: output.clone(),
                });
            }
            if !entry.outputs.is_empty() {
                txn.insert(key, encode(&entry).map_err(abort)?)?;
            }
        }
        Ok(())
    }

    /// Appends `block` and updates the index in one store transaction.
    ///
    /// Only a block extending the current tip is indexed in place. A block
    /// that takes the tip from another branch triggers a full rebuild; side
    /// blocks leave the index alone.
    pub fn commit_block(&self, block: &Block) -> Result<AppendOutcome> {
        self.chain.check_admissible(block)?;

        let commit = |txn: &TransactionalTree| -> ConflictableTransactionResult<(AppendOutcome, bool), LedgerError> {
            let previous_tip = txn.get(TIP_KEY)?;
            let outcome = Blockchain::append_in(txn, block)?;
            if outcome != AppendOutcome::NewTip {
                return Ok((outcome, false));
            }

            let extends_tip = match &previous_tip {
                Some(tip) => &tip[..] == &block.prev_digest.as_bytes()[..],
                None => true,
            };
            if extends_tip {
                Self::apply_in(txn, block)?;
            }
            Ok((outcome, extends_tip))
        };
        let (outcome, extends_tip) = self.chain.db().tree().transaction(commit)?;
        log_outcome(block, outcome);

        if outcome == AppendOutcome::NewTip && !extends_tip {
            log::warn!("⚠️  Block {} switched branches, rebuilding the UTXO set", block.digest);
            self.rebuild()?;
        }
        Ok(outcome)
    }

    /// Frames the next block after checking `pending` against the chain and
    /// against the index, so nothing spends an output twice.
    pub fn prepare_candidate(&self, pending: Vec<Transaction>) -> Result<CandidateBlock> {
        let candidate = self.chain.prepare_candidate(pending)?;

        let mut claimed = HashSet::new();
        for tx in candidate.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.inputs {
                if !claimed.insert((input.prev_tx_id, input.output_index)) {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "{}:{} is spent twice in one block",
                        input.prev_tx_id, input.output_index
                    )));
                }

                let unspent = match (self.get_entry(&input.prev_tx_id)?, u32::try_from(input.output_index)) {
                    (Some(entry), Ok(position)) => entry.contains(position),
                    _ => false,
                };
                if !unspent {
                    return Err(LedgerError::InvalidTransaction(format!(
                        "{} spends {}:{} which is not unspent",
                        tx.id, input.prev_tx_id, input.output_index
                    )));
                }
            }
        }

        Ok(candidate)
    }

    pub fn mine_and_commit(&self, pending: Vec<Transaction>) -> Result<Block> {
        let block = self.prepare_candidate(pending)?.mine()?;
        self.commit_block(&block)?;

        log::info!("⛏️  Mined block {} at height {}", block.digest, block.height);
        Ok(block)
    }

    /// First fit over entries in transaction-id order, then output position.
    /// May accumulate less than `amount`.
    pub fn find_spendable(&self, key_hash: &Hash160, amount: u64) -> Result<(u64, SpendableSelection)> {
        let mut accumulated = 0u64;
        let mut selection = SpendableSelection::new();

        for (txid, entry) in self.entries()? {
            for unspent in entry.outputs {
                if accumulated >= amount {
                    return Ok((accumulated, selection));
                }
                if unspent.output.is_locked_with(key_hash) {
                    accumulated = accumulated.saturating_add(unspent.output.value);
                    selection.entry(txid).or_default().push(unspent.index);
                }
            }
        }

        Ok((accumulated, selection))
    }

    pub fn unspent_outputs(&self, key_hash: &Hash160) -> Result<Vec<(Hash256, UnspentOutput)>> {
        let mut owned = Vec::new();
        for (txid, entry) in self.entries()? {
            for unspent in entry.outputs {
                if unspent.output.is_locked_with(key_hash) {
                    owned.push((txid, unspent));
                }
            }
        }
        Ok(owned)
    }

    pub fn balance(&self, key_hash: &Hash160) -> Result<u64> {
        Ok(self
            .unspent_outputs(key_hash)?
            .iter()
            .map(|(_, unspent)| unspent.output.value)
            .sum())
    }

    pub fn count_entries(&self) -> Result<usize> {
        self.chain.db().count_prefix(UTXO_PREFIX)
    }

    pub fn entries(&self) -> Result<Vec<(Hash256, UtxoEntry)>> {
        self.chain
            .db()
            .scan_prefix_decoded::<UtxoEntry>(UTXO_PREFIX)?
            .into_iter()
            .map(|(key, entry)| {
                Hash256::from_slice(&key)
                    .map(|txid| (txid, entry))
                    .ok_or_else(|| LedgerError::Corrupt(format!("bad UTXO key {}", hex::encode(&key))))
            })
            .collect()
    }

    pub fn get_entry(&self, txid: &Hash256) -> Result<Option<UtxoEntry>> {
        self.chain.db().get_decoded(&entry_key(txid))
    }

    pub fn total_value(&self) -> Result<u64> {
        Ok(self.entries()?.iter().map(|(_, entry)| entry.value()).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::BLOCK_REWARD;
    use crate::core::TxInput;
    use crate::storage::Database;
    use crate::wallet::Wallet;

    const TEST_DIFFICULTY: u32 = 8;

    fn setup(owner: &Wallet) -> Result<UtxoSet> {
        let db = Arc::new(Database::temporary()?);
        let chain = Blockchain::create(db, &owner.public_key_hash(), "genesis", TEST_DIFFICULTY)?;
        let utxo_set = UtxoSet::new(Arc::new(chain));
        utxo_set.rebuild()?;
        Ok(utxo_set)
    }

    fn reward_block(utxo_set: &UtxoSet, recipient: &Hash160, tag: &str) -> Result<Block> {
        utxo_set.mine_and_commit(vec![Transaction::new_coinbase(recipient, tag)?])
    }

    #[test]
    fn test_genesis_index() -> Result<()> {
        let owner = Wallet::new()?;
        let utxo_set = setup(&owner)?;

        assert_eq!(utxo_set.count_entries()?, 1);
        assert_eq!(utxo_set.balance(&owner.public_key_hash())?, BLOCK_REWARD);
        assert_eq!(utxo_set.total_value()?, BLOCK_REWARD);
        Ok(())
    }

    #[test]
    fn test_transfer_with_change() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let utxo_set = setup(&alice)?;

        let tx = Transaction::new_transfer(&alice, &bob.public_key_hash(), 30, &utxo_set)?;
        assert_eq!(tx.outputs.len(), 2);
        utxo_set.mine_and_commit(vec![tx.clone()])?;

        assert_eq!(utxo_set.balance(&bob.public_key_hash())?, 30);
        assert_eq!(utxo_set.balance(&alice.public_key_hash())?, BLOCK_REWARD - 30);
        // Genesis coinbase is fully spent, so only the transfer's entry is left.
        assert_eq!(utxo_set.count_entries()?, 1);
        assert_eq!(utxo_set.get_entry(&tx.id)?.map(|e| e.outputs.len()), Some(2));
        Ok(())
    }

    #[test]
    fn test_partial_spend_keeps_original_positions() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let utxo_set = setup(&alice)?;

        let first = Transaction::new_transfer(&alice, &bob.public_key_hash(), 40, &utxo_set)?;
        utxo_set.mine_and_commit(vec![first.clone()])?;

        // Bob spends output 0 of `first`; alice's change at position 1 stays.
        let second = Transaction::new_transfer(&bob, &alice.public_key_hash(), 40, &utxo_set)?;
        utxo_set.mine_and_commit(vec![second])?;

        let entry = utxo_set.get_entry(&first.id)?.unwrap();
        assert_eq!(entry.outputs.len(), 1);
        assert_eq!(entry.outputs[0].index, 1);
        assert_eq!(entry.outputs[0].output.value, BLOCK_REWARD - 40);

        let third = Transaction::new_transfer(&alice, &bob.public_key_hash(), BLOCK_REWARD, &utxo_set)?;
        utxo_set.mine_and_commit(vec![third])?;
        assert_eq!(utxo_set.balance(&bob.public_key_hash())?, BLOCK_REWARD);
        assert_eq!(utxo_set.balance(&alice.public_key_hash())?, 0);
        Ok(())
    }

    #[test]
    fn test_find_spendable_first_fit() -> Result<()> {
        let owner = Wallet::new()?;
        let utxo_set = setup(&owner)?;
        reward_block(&utxo_set, &owner.public_key_hash(), "two")?;
        reward_block(&utxo_set, &owner.public_key_hash(), "three")?;

        let (accumulated, selection) = utxo_set.find_spendable(&owner.public_key_hash(), 150)?;
        assert_eq!(accumulated, 2 * BLOCK_REWARD);
        assert_eq!(selection.len(), 2);

        // Selection follows index order, so repeated queries agree.
        let (_, again) = utxo_set.find_spendable(&owner.public_key_hash(), 150)?;
        assert_eq!(selection, again);
        let first_txid = utxo_set.entries()?[0].0;
        assert!(selection.contains_key(&first_txid));

        let (short, _) = utxo_set.find_spendable(&owner.public_key_hash(), 1_000)?;
        assert_eq!(short, 3 * BLOCK_REWARD);

        let (none, empty) = utxo_set.find_spendable(&Hash160::new([0u8; 20]), 10)?;
        assert_eq!(none, 0);
        assert!(empty.is_empty());
        Ok(())
    }

    #[test]
    fn test_insufficient_funds() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let utxo_set = setup(&alice)?;

        let result = Transaction::new_transfer(&alice, &bob.public_key_hash(), BLOCK_REWARD + 1, &utxo_set);
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientFunds { required, available }) if required == BLOCK_REWARD + 1 && available == BLOCK_REWARD
        ));
        assert!(matches!(
            Transaction::new_transfer(&alice, &bob.public_key_hash(), 0, &utxo_set),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert_eq!(utxo_set.blockchain().height()?, 0);
        Ok(())
    }

    #[test]
    fn test_rebuild_matches_incremental() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let utxo_set = setup(&alice)?;

        for amount in [10, 25, 5] {
            let tx = Transaction::new_transfer(&alice, &bob.public_key_hash(), amount, &utxo_set)?;
            utxo_set.mine_and_commit(vec![Transaction::new_coinbase(&bob.public_key_hash(), "")?, tx])?;
        }
        let incremental = utxo_set.entries()?;

        utxo_set.rebuild()?;
        assert_eq!(utxo_set.entries()?, incremental);
        Ok(())
    }

    #[test]
    fn test_rebuild_clears_stale_entries() -> Result<()> {
        let owner = Wallet::new()?;
        let utxo_set = setup(&owner)?;

        let stale = UtxoEntry {
            outputs: vec![UnspentOutput {
                index: 0,
                output: TxOutput::new(999, owner.public_key_hash()),
            }],
        };
        utxo_set
            .blockchain()
            .db()
            .tree()
            .insert(entry_key(&Hash256::hash(b"stale")), encode(&stale)?)?;
        assert_eq!(utxo_set.count_entries()?, 2);

        assert_eq!(utxo_set.rebuild()?, 1);
        assert_eq!(utxo_set.count_entries()?, 1);
        assert_eq!(utxo_set.balance(&owner.public_key_hash())?, BLOCK_REWARD);
        Ok(())
    }

    #[test]
    fn test_spend_within_one_block() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let carol = Wallet::new()?;
        let utxo_set = setup(&alice)?;
        let chain = utxo_set.blockchain();
        let genesis_coinbase = chain.tip()?.transactions[0].clone();

        let mut first = Transaction::new(
            vec![TxInput::new(genesis_coinbase.id, 0, alice.public_key().to_bytes().to_vec())],
            vec![TxOutput::new(BLOCK_REWARD, bob.public_key_hash())],
        )?;
        chain.sign_transaction(&mut first, alice.private_key())?;

        let mut second = Transaction::new(
            vec![TxInput::new(first.id, 0, bob.public_key().to_bytes().to_vec())],
            vec![TxOutput::new(BLOCK_REWARD, carol.public_key_hash())],
        )?;
        let mut prior = crate::core::transaction::PriorTransactions::new();
        prior.insert(first.id, first.clone());
        second.sign(bob.private_key(), &prior)?;

        let tip = chain.tip()?;
        let block = Block::new(vec![first, second], tip.digest, tip.height + 1, TEST_DIFFICULTY)?;
        assert_eq!(utxo_set.commit_block(&block)?, AppendOutcome::NewTip);

        assert_eq!(utxo_set.balance(&carol.public_key_hash())?, BLOCK_REWARD);
        assert_eq!(utxo_set.balance(&bob.public_key_hash())?, 0);
        assert_eq!(utxo_set.count_entries()?, 1);

        let incremental = utxo_set.entries()?;
        utxo_set.rebuild()?;
        assert_eq!(utxo_set.entries()?, incremental);
        Ok(())
    }

    #[test]
    fn test_double_spend_rejected() -> Result<()> {
        let alice = Wallet::new()?;
        let bob = Wallet::new()?;
        let utxo_set = setup(&alice)?;

        let a = Transaction::new_transfer(&alice, &bob.public_key_hash(), 10, &utxo_set)?;
        let b = Transaction::new_transfer(&alice, &bob.public_key_hash(), 20, &utxo_set)?;
        assert!(matches!(
            utxo_set.mine_and_commit(vec![a.clone(), b.clone()]),
            Err(LedgerError::InvalidTransaction(_))
        ));

        utxo_set.mine_and_commit(vec![a])?;
        assert!(matches!(utxo_set.mine_and_commit(vec![b]), Err(LedgerError::InvalidTransaction(_))));
        assert_eq!(utxo_set.blockchain().height()?, 1);
        Ok(())
    }

    #[test]
    fn test_outputs_bounded_by_inputs() -> Result<()> {
        let alice = Wallet::new()?;
        let utxo_set = setup(&alice)?;
        let genesis_tx = utxo_set.blockchain().tip()?.transactions[0].id;

        let mut inflated = Transaction::new(
            vec![TxInput::new(genesis_tx, 0, alice.public_key().to_bytes().to_vec())],
            vec![TxOutput::new(1_000_000, alice.public_key_hash())],
        )?;
        utxo_set.blockchain().sign_transaction(&mut inflated, alice.private_key())?;
        assert!(matches!(
            utxo_set.mine_and_commit(vec![inflated]),
            Err(LedgerError::InvalidTransaction(_))
        ));

        let no_inputs = Transaction::new(Vec::new(), vec![TxOutput::new(50, alice.public_key_hash())])?;
        assert!(matches!(
            utxo_set.mine_and_commit(vec![no_inputs]),
            Err(LedgerError::InvalidTransaction(_))
        ));

        assert_eq!(utxo_set.blockchain().height()?, 0);
        assert_eq!(utxo_set.total_value()?, BLOCK_REWARD);
        Ok(())
    }

    #[test]
    fn test_apply_twice_diverges() -> Result<()> {
        let owner = Wallet::new()?;
        let utxo_set = setup(&owner)?;
        let genesis = utxo_set.blockchain().tip()?;

        assert!(matches!(utxo_set.apply_block(&genesis), Err(LedgerError::IndexDiverged(_))));
        assert_eq!(utxo_set.balance(&owner.public_key_hash())?, BLOCK_REWARD);
        Ok(())
    }

    #[test]
    fn test_commit_is_idempotent() -> Result<()> {
        let owner = Wallet::new()?;
        let utxo_set = setup(&owner)?;
        let block = reward_block(&utxo_set, &owner.public_key_hash(), "once")?;

        assert_eq!(utxo_set.commit_block(&block)?, AppendOutcome::AlreadyKnown);
        assert_eq!(utxo_set.balance(&owner.public_key_hash())?, 2 * BLOCK_REWARD);
        Ok(())
    }

    #[test]
    fn test_side_block_then_branch_switch() -> Result<()> {
        let owner = Wallet::new()?;
        let miner_a = Hash160::new([0xaa; 20]);
        let miner_b = Hash160::new([0xbb; 20]);
        let utxo_set = setup(&owner)?;
        let genesis = utxo_set.blockchain().tip()?;

        reward_block(&utxo_set, &miner_a, "a1")?;
        assert_eq!(utxo_set.balance(&miner_a)?, BLOCK_REWARD);

        let rival = Block::new(vec![Transaction::new_coinbase(&miner_b, "b1")?], genesis.digest, 1, TEST_DIFFICULTY)?;
        assert_eq!(utxo_set.commit_block(&rival)?, AppendOutcome::Stored);
        assert_eq!(utxo_set.balance(&miner_b)?, 0);

        let longer = Block::new(vec![Transaction::new_coinbase(&miner_b, "b2")?], rival.digest, 2, TEST_DIFFICULTY)?;
        assert_eq!(utxo_set.commit_block(&longer)?, AppendOutcome::NewTip);

        assert_eq!(utxo_set.balance(&miner_a)?, 0);
        assert_eq!(utxo_set.balance(&miner_b)?, 2 * BLOCK_REWARD);
        assert_eq!(utxo_set.total_value()?, 3 * BLOCK_REWARD);
        Ok(())
    }
}
