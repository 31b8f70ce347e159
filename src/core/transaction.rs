use crate::core::utxo::UtxoSet;
use crate::crypto::hash::{Hash160, Hash256};
use crate::crypto::keys::PrivateKey;
use crate::crypto::signatures::SignatureUtils;
use crate::storage::database::{decode, encode};
use crate::wallet::Wallet;
use crate::{LedgerError, Result};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Value minted by every coinbase transaction.
pub const BLOCK_REWARD: u64 = 100;
pub const COINBASE_OUTPUT_INDEX: i64 = -1;

/// Prior transactions referenced by a transaction's inputs, keyed by id.
pub type PriorTransactions = HashMap<Hash256, Transaction>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_tx_id: Hash256,
    pub output_index: i64,
    pub signature: Vec<u8>,
    /// Spender's public key; coinbase inputs carry their memo here.
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub locking_hash: Hash160,
}

impl TxInput {
    pub fn new(prev_tx_id: Hash256, output_index: i64, public_key: Vec<u8>) -> Self {
        Self {
            prev_tx_id,
            output_index,
            signature: Vec::new(),
            public_key,
        }
    }

    pub fn uses_key(&self, key_hash: &Hash160) -> bool {
        Hash160::hash_sha256(&self.public_key) == *key_hash
    }
}

impl TxOutput {
    pub fn new(value: u64, locking_hash: Hash160) -> Self {
        Self { value, locking_hash }
    }

    pub fn is_locked_with(&self, key_hash: &Hash160) -> bool {
        self.locking_hash == *key_hash
    }
}

impl Transaction {
    /// Builds a transaction and freezes its id.
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self> {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    pub fn new_coinbase(recipient: &Hash160, memo: &str) -> Result<Self> {
        let memo = if memo.is_empty() {
            let mut nonce = [0u8; 24];
            OsRng.fill_bytes(&mut nonce);
            hex::encode(nonce)
        } else {
            memo.to_string()
        };

        let input = TxInput::new(Hash256::zero(), COINBASE_OUTPUT_INDEX, memo.into_bytes());
        let output = TxOutput::new(BLOCK_REWARD, *recipient);

        Self::new(vec![input], vec![output])
    }

    /// Pays `amount` from `wallet` to `recipient`, spending outputs picked
    /// from the UTXO index and returning any overshoot as change.
    pub fn new_transfer(wallet: &Wallet, recipient: &Hash160, amount: u64, utxo_set: &UtxoSet) -> Result<Self> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let sender = wallet.public_key_hash();
        let (accumulated, selection) = utxo_set.find_spendable(&sender, amount)?;

        if accumulated < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let public_key = wallet.public_key().to_bytes().to_vec();
        let mut inputs = Vec::new();
        for (txid, positions) in selection {
            for vout in positions {
                inputs.push(TxInput::new(txid, i64::from(vout), public_key.clone()));
            }
        }

        let mut outputs = vec![TxOutput::new(amount, *recipient)];
        if accumulated > amount {
            outputs.push(TxOutput::new(accumulated - amount, sender));
        }

        let mut tx = Self::new(inputs, outputs)?;
        utxo_set.blockchain().sign_transaction(&mut tx, wallet.private_key())?;

        log::debug!("Built transfer {} of {} ({} inputs)", tx.id, amount, tx.inputs.len());
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_zero()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// SHA-256 of the canonical encoding with `id` cleared.
    pub fn hash(&self) -> Result<Hash256> {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        Ok(Hash256::hash(&encode(&copy)?))
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        decode(data)
    }

    pub fn total_output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |total, output| {
            total
                .checked_add(output.value)
                .ok_or_else(|| LedgerError::InvalidTransaction(format!("outputs of {} overflow", self.id)))
        })
    }

    /// Sum of the outputs this transaction spends.
    pub fn input_value(&self, prev_txs: &PriorTransactions) -> Result<u64> {
        let mut total = 0u64;
        for (index, input) in self.inputs.iter().enumerate() {
            let output = referenced_output(input, prev_txs)?.ok_or_else(|| {
                LedgerError::InvalidTransaction(format!("input {} of {} references a missing output", index, self.id))
            })?;
            total = total
                .checked_add(output.value)
                .ok_or_else(|| LedgerError::InvalidTransaction(format!("inputs of {} overflow", self.id)))?;
        }
        Ok(total)
    }

    /// Copy with every input's signature and public key cleared.
    pub fn trimmed_copy(&self) -> Self {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.prev_tx_id, input.output_index, Vec::new()))
            .collect();

        Self {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    pub fn sign(&mut self, private_key: &PrivateKey, prev_txs: &PriorTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        self.ensure_resolved(prev_txs)?;

        let mut trimmed = self.trimmed_copy();
        for index in 0..self.inputs.len() {
            let locking_hash = referenced_output(&self.inputs[index], prev_txs)?
                .ok_or_else(|| {
                    LedgerError::InvalidTransaction(format!(
                        "input {} of {} references a missing output",
                        index, self.id
                    ))
                })?
                .locking_hash;

            let payload = signing_payload(&mut trimmed, index, &locking_hash)?;
            self.inputs[index].signature = private_key.sign(&payload)?.to_bytes();
        }

        Ok(())
    }

    pub fn verify(&self, prev_txs: &PriorTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        self.ensure_resolved(prev_txs)?;

        let mut trimmed = self.trimmed_copy();
        for (index, input) in self.inputs.iter().enumerate() {
            let Some(prev_output) = referenced_output(input, prev_txs)? else {
                return Ok(false);
            };
            if !input.uses_key(&prev_output.locking_hash) {
                return Ok(false);
            }

            let payload = signing_payload(&mut trimmed, index, &prev_output.locking_hash)?;
            if !SignatureUtils::verify_raw(&input.public_key, &payload, &input.signature) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn ensure_resolved(&self, prev_txs: &PriorTransactions) -> Result<()> {
        for input in &self.inputs {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                return Err(LedgerError::MissingPriorTransaction(input.prev_tx_id));
            }
        }
        Ok(())
    }
}

/// The output an input spends, or `None` when the index is out of range.
fn referenced_output<'a>(input: &TxInput, prev_txs: &'a PriorTransactions) -> Result<Option<&'a TxOutput>> {
    let prev_tx = prev_txs
        .get(&input.prev_tx_id)
        .ok_or(LedgerError::MissingPriorTransaction(input.prev_tx_id))?;

    Ok(usize::try_from(input.output_index)
        .ok()
        .and_then(|index| prev_tx.outputs.get(index)))
}

/// Id of the trimmed copy with only input `index` carrying the locking hash
/// of the output it spends.
fn signing_payload(trimmed: &mut Transaction, index: usize, locking_hash: &Hash160) -> Result<Hash256> {
    trimmed.inputs[index].public_key = locking_hash.as_bytes().to_vec();
    let payload = trimmed.hash();
    trimmed.inputs[index].public_key = Vec::new();
    payload
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            writeln!(f, "       TXID:      {}", input.prev_tx_id)?;
            writeln!(f, "       Out:       {}", input.output_index)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.public_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", output.locking_hash)?;
        }
        Ok(())
    }
}
