//! Timing, gas and container parameter constants shared by the harness.

use std::time::Duration;

/// File name for default devnet configuration, looked up under `configs/`.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "devnet.json";
/// Environment variable pointing at an alternative devnet configuration file.
pub const CONFIG_PATH_ENV: &str = "ROLLUP_HIVE_CONFIG";
/// Default enclave name used by the Kurtosis launcher.
pub const DEFAULT_ENCLAVE_NAME: &str = "rollup-hive";
/// Default endpoint used by Kurtosis engine.
pub const DEFAULT_KURTOSIS_ENGINE_ENDPOINT: &str = "https://[::1]:9710";

/// Default timeout for a single RPC call made from a test body.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
/// Time an engine is given to answer its first RPC call after start.
pub const ENGINE_UP_TIMEOUT: Duration = Duration::from_secs(10);
/// Age after which an engine-API client is rebuilt with a fresh JWT. Engines reject
/// tokens whose `iat` is more than 60s off.
pub const ENGINE_AUTH_TOKEN_TTL: Duration = Duration::from_secs(50);

/// Interval between chain height polls.
pub const HEIGHT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Interval between transaction receipt polls.
pub const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Interval between contract state polls.
pub const STATE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Interval between engine liveness checks.
pub const ENGINE_UP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Number of receipt polls a vault funding transaction gets before giving up.
pub const VAULT_RECEIPT_ATTEMPTS: usize = 60;
/// Delay between vault funding receipt polls.
pub const VAULT_RECEIPT_INTERVAL: Duration = Duration::from_secs(1);
/// Gas limit of a vault funding transaction.
pub const VAULT_FUNDING_GAS_LIMIT: u64 = 75_000;
/// Priority fee of a vault funding transaction (1 gwei).
pub const VAULT_FUNDING_TIP_CAP: u64 = 1_000_000_000;
/// Max fee of a vault funding transaction (30 gwei).
pub const VAULT_FUNDING_FEE_CAP: u64 = 30_000_000_000;
/// Priority fee of the prover whitelist transaction (1.5 gwei).
pub const WHITELIST_TIP_CAP: u64 = 1_500_000_000;
/// Gas limit of an in-process block proposal.
pub const PROPOSE_GAS_LIMIT: u64 = 3_000_000;

/// Script executed inside the contract deployer container.
pub const DEPLOY_SCRIPT: &str = "deploy.sh";

/// Container environment keys understood by the node images.
pub mod env {
    pub const ROLE: &str = "ROLE";
    pub const L1_CHAIN_ID: &str = "L1_CHAIN_ID";
    pub const L1_CLIQUE_PERIOD: &str = "L1_CLIQUE_PERIOD";
    pub const L2_CHAIN_ID: &str = "L2_CHAIN_ID";
    pub const NETWORK_ID: &str = "NETWORK_ID";
    pub const JWT_SECRET: &str = "JWT_SECRET";
    pub const BOOTNODES: &str = "BOOTNODES";
    pub const L1_RPC_ENDPOINT: &str = "L1_RPC_ENDPOINT";
    pub const L2_RPC_ENDPOINT: &str = "L2_RPC_ENDPOINT";
    pub const L2_ENGINE_ENDPOINT: &str = "L2_ENGINE_ENDPOINT";
    pub const L1_ROLLUP_ADDRESS: &str = "L1_ROLLUP_ADDRESS";
    pub const L2_ROLLUP_ADDRESS: &str = "L2_ROLLUP_ADDRESS";
    pub const THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY: &str = "THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY";
    pub const P2P_SYNC_VERIFIED_BLOCKS: &str = "P2P_SYNC_VERIFIED_BLOCKS";
    pub const PROPOSER_PRIVATE_KEY: &str = "PROPOSER_PRIVATE_KEY";
    pub const SUGGESTED_FEE_RECIPIENT: &str = "SUGGESTED_FEE_RECIPIENT";
    pub const PROPOSE_INTERVAL: &str = "PROPOSE_INTERVAL";
    pub const PRODUCE_INVALID_BLOCKS_INTERVAL: &str = "PRODUCE_INVALID_BLOCKS_INTERVAL";
    pub const PROVER_PRIVATE_KEY: &str = "PROVER_PRIVATE_KEY";
    pub const DEPLOYER_PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const L1_DEPLOYER_ADDRESS: &str = "L1_DEPLOYER_ADDRESS";
    pub const L2_GENESIS_BLOCK_HASH: &str = "L2_GENESIS_BLOCK_HASH";
    pub const MAINNET_URL: &str = "MAINNET_URL";
}

/// Port names exposed by engine containers.
pub mod ports {
    pub const RPC: &str = "rpc";
    pub const WS: &str = "ws";
    pub const ENGINE_RPC: &str = "engine-rpc";
    pub const P2P: &str = "p2p";
}
