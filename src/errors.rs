//! Error types for the devnet harness.

use ethers::types::{Address, TransactionReceipt};

/// Reason a [`crate::context::Context`] is done.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid private key for {0}")]
    Key(String),
}

#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    #[error("sender account {0:?} not in vault")]
    UnknownAccount(Address),
    #[error("failed to sign transaction: {0}")]
    Sign(String),
    #[error("unable to send funding transaction: {0}")]
    Send(String),
    #[error("error getting transaction receipt: {0}")]
    Receipt(String),
    #[error("timed out getting funding transaction receipt after {0} attempts")]
    FundingTimeout(usize),
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[derive(thiserror::Error, Debug)]
pub enum WaitError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("expected status {expected}, but got {actual}")]
    StatusMismatch {
        expected: u64,
        actual: u64,
        receipt: Box<TransactionReceipt>,
    },
    #[error("subscription closed: {0}")]
    SubscriptionClosed(String),
    #[error("failed to decode event log: {0}")]
    Decode(String),
    #[error("contract call failed: {0}")]
    Contract(String),
}

impl WaitError {
    pub(crate) fn rpc<E: std::fmt::Display>(err: E) -> Self {
        WaitError::Rpc(err.to_string())
    }

    /// True when the wait ended because its context was canceled or timed out.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Context(_))
    }

    /// Receipt of a transaction that landed with an unexpected status.
    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            WaitError::StatusMismatch { receipt, .. } => Some(receipt.as_ref()),
            _ => None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error("kurtosis cli is not installed locally")]
    CliNotInstalled,
    #[error("failed to connect to kurtosis engine: {0}")]
    EngineConnect(String),
    #[error("failed to start kurtosis engine locally, check if docker installed")]
    FailedToStartEngine,
    #[error("failed to check kurtosis engine status")]
    FailedToCheckEngineStatus,
    #[error("failed to add enclave: {0}")]
    FailedToAddEnclave(String),
    #[error("failed to destroy enclave: {0}")]
    FailedToDestroyEnclave(String),
    #[error("failed to add service {0}: {1}")]
    FailedToAddService(String, String),
    #[error("failed to fetch and parse enclave services: {0}")]
    FailedToGetEnclaveServices(String),
    #[error("service {0} not found in enclave")]
    ServiceNotFound(String),
    #[error("service {0} has no {1} port")]
    MissingPort(String, String),
    #[error("failed to exec in service {0}: {1}")]
    FailedToExec(String, String),
}

#[derive(thiserror::Error, Debug)]
pub enum DevnetError {
    #[error("no {0} client types found")]
    NoClientType(&'static str),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("engine node {0} should be up within {1:?}: {2}")]
    EngineNotUp(String, std::time::Duration, String),
    #[error("failed to deploy contract on engine node {0}: {1}")]
    ContractDeployment(String, String),
    #[error("add whitelist failed: {0}")]
    Whitelist(String),
    #[error("only have {count} {role} nodes, cannot find {index}")]
    NodeIndex {
        role: &'static str,
        count: usize,
        index: usize,
    },
    #[error("failed to instantiate RPC client: {0}")]
    FailedToCreateRpcClient(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

#[derive(thiserror::Error, Debug)]
pub enum ProposeError {
    #[error("propose rejected, too many pending blocks: {0}")]
    TooManyPendingBlocks(String),
    #[error("propose rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// Umbrella error returned by test bodies.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Devnet(#[from] DevnetError),
    #[error(transparent)]
    Propose(#[from] ProposeError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}
