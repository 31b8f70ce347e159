use crate::mining::pow::{check_difficulty, DEFAULT_DIFFICULTY};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub mining: MiningConfig,
    pub genesis_memo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningConfig {
    pub difficulty: u32,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = env::var("HOME").unwrap_or_else(|_| ".".to_string());

        Self {
            storage: StorageConfig {
                data_dir: PathBuf::from(home_dir).join(".utxo-ledger"),
            },
            mining: MiningConfig {
                difficulty: DEFAULT_DIFFICULTY,
            },
            genesis_memo: "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks".to_string(),
        }
    }
}

impl Config {
    /// Reads a JSON config from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        check_difficulty(self.mining.difficulty)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        Self::default().storage.data_dir.join("config.json")
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join("ledger.db")
    }
}
