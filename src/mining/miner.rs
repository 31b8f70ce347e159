use crate::core::{Block, Transaction, UtxoSet};
use crate::crypto::hash::Hash160;
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningStats {
    pub blocks_mined: u64,
    pub last_block_time: Option<i64>,
    pub last_block_seconds: Option<f64>,
    pub current_difficulty: u32,
}

/// Mines blocks paying `reward_address` and commits them through the
/// UTXO set. The nonce search runs on the blocking pool so the async
/// runtime stays responsive.
pub struct Miner {
    utxo_set: Arc<UtxoSet>,
    reward_address: Hash160,
    blocks_mined: AtomicU64,
    stats: RwLock<MiningStats>,
}

impl Miner {
    pub fn new(utxo_set: Arc<UtxoSet>, reward_address: Hash160) -> Self {
        let stats = MiningStats {
            current_difficulty: utxo_set.blockchain().difficulty(),
            ..MiningStats::default()
        };

        Self {
            utxo_set,
            reward_address,
            blocks_mined: AtomicU64::new(0),
            stats: RwLock::new(stats),
        }
    }

    /// Mines one block carrying a fresh coinbase followed by `pending`.
    /// Runs to completion; there is no cancellation.
    pub async fn mine(&self, pending: Vec<Transaction>) -> Result<Block> {
        let height = self.utxo_set.blockchain().height()?.saturating_add(1);
        let coinbase = Transaction::new_coinbase(&self.reward_address, &format!("Block {} reward", height))?;

        let mut transactions = Vec::with_capacity(pending.len() + 1);
        transactions.push(coinbase);
        transactions.extend(pending);

        let candidate = self.utxo_set.prepare_candidate(transactions)?;
        log::info!(
            "⛏️  Mining block {} with {} transactions at difficulty {}",
            candidate.height,
            candidate.transactions.len(),
            candidate.difficulty
        );

        let start_time = Instant::now();
        let block = tokio::task::spawn_blocking(move || candidate.mine())
            .await
            .map_err(|e| LedgerError::Mining(format!("mining worker failed: {}", e)))??;
        let elapsed = start_time.elapsed().as_secs_f64();

        self.utxo_set.commit_block(&block)?;
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);

        let mut stats = self.stats.write().unwrap_or_else(|poisoned| {
            log::warn!("⚠️  Mining stats lock was poisoned, recovering it");
            poisoned.into_inner()
        });
        stats.last_block_time = Some(block.timestamp);
        stats.last_block_seconds = Some(elapsed);
        drop(stats);

        log::info!("✅ Block mined! Hash: {}, Nonce: {}, Time: {:.2}s", block.digest, block.nonce, elapsed);
        Ok(block)
    }

    /// Mines a block holding only the reward.
    pub async fn mine_reward_block(&self) -> Result<Block> {
        self.mine(Vec::new()).await
    }

    pub fn get_stats(&self) -> MiningStats {
        let mut stats = match self.stats.read() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => {
                log::warn!("⚠️  Mining stats lock was poisoned, recovering it");
                poisoned.into_inner().clone()
            }
        };
        stats.blocks_mined = self.blocks_mined.load(Ordering::Relaxed);
        stats
    }
}
