use std::sync::Arc;
use utxo_ledger::core::transaction::BLOCK_REWARD;
use utxo_ledger::core::{AppendOutcome, Blockchain, Transaction, UtxoSet};
use utxo_ledger::crypto::hash::Hash160;
use utxo_ledger::storage::Database;
use utxo_ledger::wallet::Wallet;
use utxo_ledger::{LedgerError, Result};

const TEST_DIFFICULTY: u32 = 8;

fn new_ledger(owner: &Wallet) -> Result<UtxoSet> {
    let db = Arc::new(Database::temporary()?);
    let chain = Blockchain::create(db, &owner.public_key_hash(), "scenario genesis", TEST_DIFFICULTY)?;
    let utxo_set = UtxoSet::new(Arc::new(chain));
    utxo_set.rebuild()?;
    Ok(utxo_set)
}

fn minted(utxo_set: &UtxoSet) -> Result<u64> {
    let mut total = 0;
    for block in utxo_set.blockchain().iter()? {
        for tx in block?.transactions.iter().filter(|tx| tx.is_coinbase()) {
            total += tx.total_output_value()?;
        }
    }
    Ok(total)
}

#[test]
fn genesis_pays_the_creator() -> Result<()> {
    let x = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;

    assert_eq!(utxo_set.balance(&x.public_key_hash())?, BLOCK_REWARD);
    assert_eq!(utxo_set.count_entries()?, 1);
    assert_eq!(utxo_set.blockchain().height()?, 0);
    Ok(())
}

#[test]
fn transfer_splits_into_payment_and_change() -> Result<()> {
    let x = Wallet::new()?;
    let y = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;

    let tx = Transaction::new_transfer(&x, &y.public_key_hash(), 35, &utxo_set)?;
    assert_eq!(tx.outputs.len(), 2);
    let block = utxo_set.mine_and_commit(vec![tx])?;

    assert_eq!(block.height, 1);
    assert_eq!(utxo_set.balance(&y.public_key_hash())?, 35);
    assert_eq!(utxo_set.balance(&x.public_key_hash())?, BLOCK_REWARD - 35);
    Ok(())
}

#[test]
fn overspending_mines_nothing() -> Result<()> {
    let x = Wallet::new()?;
    let y = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;
    let tip = utxo_set.blockchain().last_digest()?;

    let result = Transaction::new_transfer(&x, &y.public_key_hash(), BLOCK_REWARD * 2, &utxo_set);
    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));

    assert_eq!(utxo_set.blockchain().last_digest()?, tip);
    assert_eq!(utxo_set.balance(&x.public_key_hash())?, BLOCK_REWARD);
    Ok(())
}

#[test]
fn rebuild_equals_incremental_index() -> Result<()> {
    let x = Wallet::new()?;
    let y = Wallet::new()?;
    let z = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;

    let plan = [(&x, &y, 40), (&y, &z, 15), (&x, &z, 60), (&z, &x, 70)];
    for (from, to, amount) in plan {
        let reward = Transaction::new_coinbase(&from.public_key_hash(), "")?;
        let tx = Transaction::new_transfer(from, &to.public_key_hash(), amount, &utxo_set)?;
        utxo_set.mine_and_commit(vec![reward, tx])?;
    }
    assert_eq!(utxo_set.blockchain().height()?, plan.len() as u64);

    let incremental = utxo_set.entries()?;
    utxo_set.rebuild()?;
    assert_eq!(utxo_set.entries()?, incremental);
    Ok(())
}

#[test]
fn tampered_output_keeps_pow_but_fails_signature() -> Result<()> {
    let x = Wallet::new()?;
    let y = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;

    let tx = Transaction::new_transfer(&x, &y.public_key_hash(), 10, &utxo_set)?;
    let mut block = utxo_set.mine_and_commit(vec![tx])?;
    assert!(block.validate());

    block.transactions[0].outputs[0].value = 1_000;
    assert!(block.validate());
    assert!(!utxo_set.blockchain().verify_transaction(&block.transactions[0])?);
    Ok(())
}

#[test]
fn index_value_matches_minted_value() -> Result<()> {
    let x = Wallet::new()?;
    let y = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;

    for amount in [1, 99, 50] {
        let from = if utxo_set.balance(&x.public_key_hash())? >= amount { &x } else { &y };
        let to = if std::ptr::eq(from, &x) { &y } else { &x };
        let reward = Transaction::new_coinbase(&Hash160::new([7u8; 20]), "")?;
        let tx = Transaction::new_transfer(from, &to.public_key_hash(), amount, &utxo_set)?;
        utxo_set.mine_and_commit(vec![reward, tx])?;

        assert_eq!(utxo_set.total_value()?, minted(&utxo_set)?);
    }
    assert_eq!(minted(&utxo_set)?, 4 * BLOCK_REWARD);
    Ok(())
}

#[test]
fn appending_twice_changes_nothing() -> Result<()> {
    let x = Wallet::new()?;
    let utxo_set = new_ledger(&x)?;
    let block = utxo_set.mine_and_commit(vec![Transaction::new_coinbase(&x.public_key_hash(), "")?])?;
    let entries = utxo_set.entries()?;

    assert_eq!(utxo_set.blockchain().append(&block)?, AppendOutcome::AlreadyKnown);
    assert_eq!(utxo_set.commit_block(&block)?, AppendOutcome::AlreadyKnown);
    assert_eq!(utxo_set.blockchain().height()?, 1);
    assert_eq!(utxo_set.entries()?, entries);
    assert_eq!(utxo_set.blockchain().audit()?, 2);
    Ok(())
}

#[test]
fn chain_survives_reopen() -> Result<()> {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger.db");
    let x = Wallet::new()?;
    let y = Wallet::new()?;

    let tip = {
        let db = Arc::new(Database::new(&path)?);
        let chain = Blockchain::create(db.clone(), &x.public_key_hash(), "persisted", TEST_DIFFICULTY)?;
        let utxo_set = UtxoSet::new(Arc::new(chain));
        utxo_set.rebuild()?;
        let tx = Transaction::new_transfer(&x, &y.public_key_hash(), 25, &utxo_set)?;
        let block = utxo_set.mine_and_commit(vec![tx])?;
        db.flush()?;
        block.digest
    };

    let db = Arc::new(Database::new(&path)?);
    let utxo_set = UtxoSet::new(Arc::new(Blockchain::open(db, TEST_DIFFICULTY)?));
    assert_eq!(utxo_set.blockchain().last_digest()?, tip);
    assert_eq!(utxo_set.balance(&y.public_key_hash())?, 25);
    assert_eq!(utxo_set.balance(&x.public_key_hash())?, BLOCK_REWARD - 25);
    Ok(())
}
