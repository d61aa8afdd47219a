//! Devnet configuration: chain ids, rollup addresses, role keys and client images.

use std::path::Path;
use std::time::Duration;

use ethers::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::errors::ConfigError;

/// Hex encoded private key of a well known account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyConfig {
    pub private_key: String,
}

impl KeyConfig {
    pub fn new(private_key: &str) -> Self {
        Self {
            private_key: private_key.trim_start_matches("0x").to_string(),
        }
    }

    /// Wallet for this key, not yet bound to a chain id.
    pub fn wallet(&self) -> Result<LocalWallet, ConfigError> {
        self.private_key
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| ConfigError::Key(e.to_string()))
    }

    pub fn address(&self) -> Result<Address, ConfigError> {
        Ok(self.wallet()?.address())
    }

    /// Private key without `0x` prefix, as node images expect it.
    pub fn hex(&self) -> &str {
        self.private_key.trim_start_matches("0x")
    }
}

/// Container images run for each node role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientImages {
    pub l1_engine: Vec<String>,
    pub l2_engine: Vec<String>,
    pub driver: Vec<String>,
    pub proposer: Vec<String>,
    pub prover: Vec<String>,
    pub protocol: Option<String>,
}

impl Default for ClientImages {
    fn default() -> Self {
        Self {
            l1_engine: vec!["ethereum/client-go:v1.11.6".to_string()],
            l2_engine: vec!["taikoxyz/taiko-geth:latest".to_string()],
            driver: vec!["taikoxyz/taiko-client:latest".to_string()],
            proposer: vec!["taikoxyz/taiko-client:latest".to_string()],
            prover: vec!["taikoxyz/taiko-client:latest".to_string()],
            protocol: Some("taikoxyz/taiko-protocol:latest".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L1Config {
    pub chain_id: u64,
    /// Clique period in seconds.
    pub mine_interval: u64,
    pub rollup_address: Address,
    pub deployer: KeyConfig,
    /// Genesis-funded account backing the L1 vault.
    pub funder: KeyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct L2Config {
    pub chain_id: u64,
    pub network_id: u64,
    pub rollup_address: Address,
    pub genesis_block_hash: H256,
    pub jwt_secret: String,
    pub propose_interval_secs: u64,
    /// Zero disables invalid block production.
    pub produce_invalid_blocks_interval: u64,
    /// Maximum number of proposed but unverified blocks the rollup contract accepts.
    pub max_num_blocks: u64,
    pub throwaway: KeyConfig,
    pub proposer: KeyConfig,
    pub prover: KeyConfig,
    pub suggested_fee_recipient: Address,
    /// Genesis-funded account backing the L2 vault.
    pub funder: KeyConfig,
}

impl L2Config {
    pub fn propose_interval(&self) -> Duration {
        Duration::from_secs(self.propose_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub enclave: String,
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub images: ClientImages,
    pub l1: L1Config,
    pub l2: L2Config,
}

// Well known development accounts, funded in both genesis files.
const DEV_KEY_0: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_KEY_1: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const DEV_KEY_2: &str = "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a";
const DEV_KEY_3: &str = "7c852118294e51e653712a81e05800f419141751be58f605c371e15141b007a6";
const DEV_KEY_4: &str = "47e179ec197488593b187f80a00eb0da91f1b9d0b13f8733639f19c30a34926a";

impl Default for Config {
    fn default() -> Self {
        Self {
            enclave: constants::DEFAULT_ENCLAVE_NAME.to_string(),
            rpc_timeout_secs: constants::DEFAULT_RPC_TIMEOUT.as_secs(),
            images: ClientImages::default(),
            l1: L1Config {
                chain_id: 1336,
                mine_interval: 1,
                rollup_address: "0x9fcf7d13d10dedf17d0f24c62f0cf4ed462f65b7"
                    .parse()
                    .unwrap_or_default(),
                deployer: KeyConfig::new(DEV_KEY_1),
                funder: KeyConfig::new(DEV_KEY_0),
            },
            l2: L2Config {
                chain_id: 167,
                network_id: 167,
                rollup_address: "0x0000777700000000000000000000000000000001"
                    .parse()
                    .unwrap_or_default(),
                genesis_block_hash: H256::zero(),
                jwt_secret: "c49690b5a9bc72c7b451b48c5fee2b542e66559d840a133d090769abc56e39e7"
                    .to_string(),
                propose_interval_secs: 1,
                produce_invalid_blocks_interval: 0,
                max_num_blocks: 2048,
                throwaway: KeyConfig::new(DEV_KEY_4),
                proposer: KeyConfig::new(DEV_KEY_2),
                prover: KeyConfig::new(DEV_KEY_3),
                suggested_fee_recipient: Address::zero(),
                funder: KeyConfig::new(DEV_KEY_0),
            },
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load configuration from `$ROLLUP_HIVE_CONFIG`, then `configs/devnet.json`,
    /// falling back to the built-in defaults when neither exists.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(constants::CONFIG_PATH_ENV) {
            return Self::from_file(path);
        }
        let default_path = Path::new("configs").join(constants::DEFAULT_CONFIG_FILE_NAME);
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        Ok(Self::default())
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keys_parse() {
        let conf = Config::default();
        assert_eq!(
            conf.l1.funder.address().unwrap(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse::<Address>().unwrap()
        );
        assert!(conf.l2.prover.wallet().is_ok());
        assert_ne!(conf.l2.prover.address().unwrap(), conf.l2.proposer.address().unwrap());
    }

    #[test]
    fn shipped_config_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("configs")
            .join(constants::DEFAULT_CONFIG_FILE_NAME);
        let conf = Config::from_file(path).unwrap();
        assert_eq!(conf.l2.chain_id, 167);
        assert_eq!(conf.rpc_timeout(), Duration::from_secs(10));
        assert!(!conf.images.l2_engine.is_empty());
    }

    #[test]
    fn bad_key_is_reported() {
        let key = KeyConfig::new("not-a-key");
        assert!(matches!(key.wallet(), Err(ConfigError::Key(_))));
    }
}
