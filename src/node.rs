//! Typed handles over running node containers.
//!
//! Handles are created once a node's container is running. Their RPC clients are
//! built on first use and cached for the handle's lifetime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use ethers::prelude::*;
use ethers::providers::{Authorization, JwtAuth, JwtKey};
use tokio::sync::OnceCell;
use url::Url;

use crate::constants::{ports, ENGINE_AUTH_TOKEN_TTL};
use crate::context::Context;
use crate::errors::{DevnetError, LaunchError};
use crate::rollup::RollupL1;
use crate::types::{HttpClient, WsClient};

/// Closed set of roles a node can play in the devnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    L1Engine,
    L2Engine,
    Driver,
    Proposer,
    Prover,
    ContractDeployer,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::L1Engine => "l1-engine",
            NodeRole::L2Engine => "l2-engine",
            NodeRole::Driver => "driver",
            NodeRole::Proposer => "proposer",
            NodeRole::Prover => "prover",
            NodeRole::ContractDeployer => "protocol",
        }
    }

    /// Named ports the role's container exposes, with their private port numbers.
    pub fn port_specs(&self) -> &'static [(&'static str, u16)] {
        match self {
            NodeRole::L1Engine | NodeRole::L2Engine => &[
                (ports::RPC, 8545),
                (ports::WS, 8546),
                (ports::ENGINE_RPC, 8551),
                (ports::P2P, 30303),
            ],
            _ => &[],
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a node while the devnet adds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not part of the network. A node falls back here when starting or wiring it
    /// fails, and is never appended.
    Absent,
    /// Container spawned, waiting for its RPC endpoint to answer.
    Starting,
    /// Role specific wiring applied (contracts, whitelist, peers).
    Wired,
    /// Appended to its role's sequence and visible to `get_*` calls.
    Ready,
}

/// Named key/value options handed to a node container as its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartParams(BTreeMap<String, String>);

impl StartParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Service port of a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    /// Port name e.g. "rpc", "ws", "engine-rpc"
    pub name: String,
    /// Private port inside the container
    pub private_port: u16,
    /// Host address the port is published on, e.g. "127.0.0.1:56766"
    pub public_addr: String,
}

/// Network identity of a started node container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Service name, resolvable from other containers
    pub name: String,
    /// Unique identifier of the service
    pub uuid: String,
    pub ports: Vec<ServicePort>,
}

impl ServiceEndpoint {
    pub fn port(&self, name: &str) -> Result<&ServicePort, LaunchError> {
        self.ports
            .iter()
            .find(|port| port.name == name)
            .ok_or_else(|| LaunchError::MissingPort(self.name.clone(), name.to_string()))
    }

    /// URL reachable from the harness host.
    pub fn public_url(&self, scheme: &str, port: &str) -> Result<String, LaunchError> {
        Ok(format!("{scheme}://{}", self.port(port)?.public_addr))
    }

    /// URL reachable from other containers of the same enclave.
    pub fn internal_url(&self, scheme: &str, port: &str) -> Result<String, LaunchError> {
        Ok(format!("{scheme}://{}:{}", self.name, self.port(port)?.private_port))
    }
}

/// Execution client of either chain.
pub struct EngineNode {
    role: NodeRole,
    endpoint: ServiceEndpoint,
    rollup_address: Address,
    jwt_secret: Option<String>,
    http: OnceCell<Arc<HttpClient>>,
    ws: OnceCell<Arc<WsClient>>,
    engine: Mutex<Option<(Instant, Arc<HttpClient>)>>,
}

impl EngineNode {
    pub fn new(role: NodeRole, endpoint: ServiceEndpoint, rollup_address: Address) -> Self {
        Self {
            role,
            endpoint,
            rollup_address,
            jwt_secret: None,
            http: OnceCell::new(),
            ws: OnceCell::new(),
            engine: Mutex::new(None),
        }
    }

    /// Hex encoded secret authenticating calls to the engine API.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Rollup contract address on this engine's chain.
    pub fn rollup_address(&self) -> Address {
        self.rollup_address
    }

    pub fn http_rpc_endpoint(&self) -> Result<String, LaunchError> {
        self.endpoint.internal_url("http", ports::RPC)
    }

    pub fn ws_rpc_endpoint(&self) -> Result<String, LaunchError> {
        self.endpoint.internal_url("ws", ports::WS)
    }

    pub fn engine_endpoint(&self) -> Result<String, LaunchError> {
        self.endpoint.internal_url("http", ports::ENGINE_RPC)
    }

    /// HTTP client of the engine, built on first use.
    pub async fn eth_client(&self) -> Result<Arc<HttpClient>, DevnetError> {
        self.http
            .get_or_try_init(|| async {
                let url = self.endpoint.public_url("http", ports::RPC)?;
                let provider = Provider::<Http>::try_from(url.as_str())
                    .map_err(|e| DevnetError::FailedToCreateRpcClient(e.to_string()))?;
                Ok::<_, DevnetError>(Arc::new(provider))
            })
            .await
            .cloned()
    }

    /// WebSocket client of the engine, connected on first use.
    pub async fn ws_client(&self) -> Result<Arc<WsClient>, DevnetError> {
        self.ws
            .get_or_try_init(|| async {
                let url = self.endpoint.public_url("ws", ports::WS)?;
                let provider = Provider::<Ws>::connect(url.as_str())
                    .await
                    .map_err(|e| DevnetError::FailedToCreateRpcClient(e.to_string()))?;
                Ok::<_, DevnetError>(Arc::new(provider))
            })
            .await
            .cloned()
    }

    /// Engine-API client authenticated with the node's JWT secret.
    ///
    /// The bearer token is minted when the client is built, so a cached client is
    /// replaced once it is older than [`ENGINE_AUTH_TOKEN_TTL`].
    pub fn engine_client(&self) -> Result<Arc<HttpClient>, DevnetError> {
        let mut cached = self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((built, client)) = cached.as_ref() {
            if built.elapsed() < ENGINE_AUTH_TOKEN_TTL {
                return Ok(client.clone());
            }
        }
        let client = Arc::new(self.build_engine_client()?);
        *cached = Some((Instant::now(), client.clone()));
        Ok(client)
    }

    fn build_engine_client(&self) -> Result<HttpClient, DevnetError> {
        let failed = DevnetError::FailedToCreateRpcClient;
        let secret = self
            .jwt_secret
            .as_deref()
            .ok_or_else(|| failed(format!("{} has no JWT secret", self.name())))?;
        let secret = ethers::utils::hex::decode(secret).map_err(|e| failed(e.to_string()))?;
        let key = JwtKey::from_slice(&secret).map_err(failed)?;
        let token = JwtAuth::new(key, None, None)
            .generate_token()
            .map_err(|e| failed(e.to_string()))?;

        let url = self.endpoint.public_url("http", ports::ENGINE_RPC)?;
        let url = Url::parse(&url).map_err(|e| failed(e.to_string()))?;
        let http = Http::new_with_auth(url, Authorization::bearer(token))
            .map_err(|e| failed(e.to_string()))?;
        Ok(Provider::new(http))
    }

    /// Rollup contract binding over the engine's HTTP client.
    pub async fn rollup_l1_client(&self) -> Result<RollupL1<HttpClient>, DevnetError> {
        Ok(RollupL1::new(self.rollup_address, self.eth_client().await?))
    }

    /// Peer URL other engines can use as boot node.
    pub async fn enode_url(&self, ctx: &Context) -> Result<String, DevnetError> {
        let client = self.eth_client().await?;
        let info = ctx
            .run(client.node_info())
            .await
            .map_err(|e| DevnetError::Rpc(e.to_string()))?
            .map_err(|e| DevnetError::Rpc(e.to_string()))?;
        Ok(info.enode)
    }
}

impl fmt::Debug for EngineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineNode")
            .field("role", &self.role)
            .field("endpoint", &self.endpoint)
            .field("rollup_address", &self.rollup_address)
            .finish_non_exhaustive()
    }
}

/// Driver rebuilding L2 blocks from L1 proposals.
#[derive(Debug, Clone)]
pub struct DriverNode {
    pub endpoint: ServiceEndpoint,
}

/// Proposer submitting L2 transaction batches to L1.
#[derive(Debug, Clone)]
pub struct ProposerNode {
    pub endpoint: ServiceEndpoint,
}

/// Prover submitting validity proofs to L1, whitelisted before start.
#[derive(Debug, Clone)]
pub struct ProverNode {
    pub endpoint: ServiceEndpoint,
    pub address: Address,
}

/// One-shot container deploying the rollup contracts on an L1 engine.
#[derive(Debug, Clone)]
pub struct ContractNode {
    pub endpoint: ServiceEndpoint,
}
