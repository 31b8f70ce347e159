use crate::config::Config;
use crate::core::{Blockchain, Transaction, UtxoSet};
use crate::crypto::keys::address_to_hash160;
use crate::mining::Miner;
use crate::storage::Database;
use crate::wallet::Wallet;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Single-node UTXO ledger with proof-of-work mining")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Data directory")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, help = "Proof-of-work difficulty in leading zero bits (1-255)")]
    pub difficulty: Option<u32>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a key pair and print its address and WIF private key
    CreateWallet,

    /// Create a new chain whose genesis reward pays ADDRESS
    CreateChain {
        #[arg(long, help = "Address receiving the genesis reward")]
        address: String,
    },

    /// Show the spendable balance of an address
    Balance {
        #[arg(long)]
        address: String,
    },

    /// Transfer value and mine it into a new block
    Send {
        #[arg(long, help = "Sender's private key in WIF format")]
        from_key: String,
        #[arg(long, help = "Recipient address")]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Print every block from tip to genesis
    Print,

    /// Rebuild the UTXO index from the chain
    Reindex,

    /// Check proof of work and linkage of every block
    Audit,
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging once
    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    // Override config with CLI arguments
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(difficulty) = cli.difficulty {
        config.mining.difficulty = difficulty;
    }
    config.validate()?;

    if let Commands::CreateWallet = cli.command {
        return create_wallet();
    }

    let db = open_database(&config)?;
    match cli.command {
        Commands::CreateWallet => create_wallet(),
        Commands::CreateChain { address } => create_chain(&config, db, &address),
        Commands::Balance { address } => balance(&config, db, &address),
        Commands::Send { from_key, to, amount } => send(&config, db, &from_key, &to, amount).await,
        Commands::Print => print_chain(&config, db),
        Commands::Reindex => reindex(&config, db),
        Commands::Audit => audit(&config, db),
    }
}

fn open_database(config: &Config) -> anyhow::Result<Arc<Database>> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db = Database::new(config.db_path())
        .with_context(|| format!("failed to open database in {}", config.storage.data_dir.display()))?;
    Ok(Arc::new(db))
}

fn open_utxo_set(config: &Config, db: Arc<Database>) -> anyhow::Result<Arc<UtxoSet>> {
    let chain = Blockchain::open(db, config.mining.difficulty)?;
    Ok(Arc::new(UtxoSet::new(Arc::new(chain))))
}

fn create_wallet() -> anyhow::Result<()> {
    let wallet = Wallet::new()?;

    println!("🔑 New wallet created");
    println!("Address:     {}", wallet.address());
    println!("Private key: {}", wallet.private_key().to_wif());
    println!("⚠️  Keep the private key safe; it is not stored anywhere");
    Ok(())
}

fn create_chain(config: &Config, db: Arc<Database>, address: &str) -> anyhow::Result<()> {
    let recipient = address_to_hash160(address)?;

    let chain = Blockchain::create(db, &recipient, &config.genesis_memo, config.mining.difficulty)?;
    let utxo_set = UtxoSet::new(Arc::new(chain));
    utxo_set.rebuild()?;

    println!("✅ Chain created, genesis {}", utxo_set.blockchain().last_digest()?);
    Ok(())
}

fn balance(config: &Config, db: Arc<Database>, address: &str) -> anyhow::Result<()> {
    let owner = address_to_hash160(address)?;
    let utxo_set = open_utxo_set(config, db)?;

    let unspent = utxo_set.unspent_outputs(&owner)?;
    let total: u64 = unspent.iter().map(|(_, output)| output.output.value).sum();

    println!("💰 Balance of {}: {}", address, total);
    for (txid, output) in unspent {
        log::debug!("  {}:{} = {}", txid, output.index, output.output.value);
    }
    Ok(())
}

async fn send(config: &Config, db: Arc<Database>, from_key: &str, to: &str, amount: u64) -> anyhow::Result<()> {
    let wallet = Wallet::from_wif(from_key).context("invalid sender key")?;
    let recipient = address_to_hash160(to)?;
    let utxo_set = open_utxo_set(config, db)?;

    let tx = match Transaction::new_transfer(&wallet, &recipient, amount, &utxo_set) {
        Ok(tx) => tx,
        Err(e) if e.is_recoverable() => {
            println!("❌ {}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let miner = Miner::new(utxo_set.clone(), wallet.public_key_hash());
    let block = miner.mine(vec![tx]).await?;

    println!("✅ Sent {} to {} in block {} (height {})", amount, to, block.digest, block.height);
    Ok(())
}

fn print_chain(config: &Config, db: Arc<Database>) -> anyhow::Result<()> {
    let utxo_set = open_utxo_set(config, db)?;

    for block in utxo_set.blockchain().iter()? {
        println!("{}", block?);
    }
    Ok(())
}

fn reindex(config: &Config, db: Arc<Database>) -> anyhow::Result<()> {
    let utxo_set = open_utxo_set(config, db)?;
    let entries = utxo_set.rebuild()?;

    println!("🔄 Done! There are {} transactions in the UTXO set", entries);
    Ok(())
}

fn audit(config: &Config, db: Arc<Database>) -> anyhow::Result<()> {
    let utxo_set = open_utxo_set(config, db)?;
    let checked = utxo_set.blockchain().audit()?;

    println!("✅ {} blocks checked, chain is valid", checked);
    Ok(())
}
