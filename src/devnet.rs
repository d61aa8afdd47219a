//! Devnet orchestration: starts, wires and tracks the nodes of an L1/L2 rollup network.
//!
//! Node sequences are append-only. Indices handed out by the `get_*` accessors stay
//! valid for the lifetime of the devnet, and the lock guarding the sequences is only
//! held for the append itself. Starting and wiring a node happens outside of it.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{env, DEPLOY_SCRIPT, ENGINE_UP_TIMEOUT};
use crate::context::Context;
use crate::errors::{DevnetError, LaunchError};
use crate::kurtosis::KurtosisLauncher;
use crate::launcher::NodeLauncher;
use crate::node::{
    ContractNode, DriverNode, EngineNode, NodeRole, NodeState, ProposerNode, ProverNode,
    StartParams,
};
use crate::rollup;
use crate::vault::Vault;
use crate::wait;

#[derive(Default)]
struct Nodes {
    contracts: Vec<Arc<ContractNode>>,
    l1_engines: Vec<Arc<EngineNode>>,
    l2_engines: Vec<Arc<EngineNode>>,
    drivers: Vec<Arc<DriverNode>>,
    proposers: Vec<Arc<ProposerNode>>,
    provers: Vec<Arc<ProverNode>>,
}

/// Rollup network of L1/L2 engines plus driver, proposer and prover processes.
pub struct Devnet {
    conf: Arc<Config>,
    launcher: Arc<dyn NodeLauncher>,
    l1_vault: Vault,
    l2_vault: Vault,
    nodes: RwLock<Nodes>,
}

impl Devnet {
    /// Create an empty devnet whose nodes are started by `launcher`.
    pub fn new(conf: Config, launcher: Arc<dyn NodeLauncher>) -> Result<Self, DevnetError> {
        let l1_vault = Vault::new(conf.l1.chain_id, conf.l1.funder.wallet()?);
        let l2_vault = Vault::new(conf.l2.chain_id, conf.l2.funder.wallet()?);
        Ok(Self {
            conf: Arc::new(conf),
            launcher,
            l1_vault,
            l2_vault,
            nodes: RwLock::new(Nodes::default()),
        })
    }

    /// Create an empty devnet in the Kurtosis enclave named by `conf`.
    pub async fn connect(conf: Config) -> Result<Self, DevnetError> {
        let launcher = KurtosisLauncher::connect(&conf.enclave).await?;
        Self::new(conf, Arc::new(launcher))
    }

    pub fn conf(&self) -> &Arc<Config> {
        &self.conf
    }

    pub fn l1_vault(&self) -> &Vault {
        &self.l1_vault
    }

    pub fn l2_vault(&self) -> &Vault {
        &self.l2_vault
    }

    fn nodes(&self) -> RwLockReadGuard<'_, Nodes> {
        self.nodes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, push: impl FnOnce(&mut Nodes)) {
        let mut nodes = self.nodes.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        push(&mut nodes);
    }

    /// Start an L1 engine, deploy the rollup contracts on it and add it to the network.
    pub async fn add_l1_engine(
        &self,
        ctx: &Context,
        client_idx: usize,
    ) -> Result<Arc<EngineNode>, DevnetError> {
        let image = pick_image(&self.conf.images.l1_engine, "l1 engine", client_idx)?;
        let params = l1_engine_params(&self.conf);
        let node = self.start_engine(ctx, NodeRole::L1Engine, image, &params).await?;
        if let Err(err) = self.deploy_l1_contracts(ctx, &node).await {
            transition(NodeRole::L1Engine, node.name(), NodeState::Absent);
            return Err(err);
        }
        transition(NodeRole::L1Engine, node.name(), NodeState::Wired);

        let node = Arc::new(node);
        self.append(|nodes| nodes.l1_engines.push(node.clone()));
        transition(NodeRole::L1Engine, node.name(), NodeState::Ready);
        Ok(node)
    }

    /// Start an L2 engine peered with every L2 engine already in the network.
    pub async fn add_l2_engine(
        &self,
        ctx: &Context,
        client_idx: usize,
    ) -> Result<Arc<EngineNode>, DevnetError> {
        let bootnodes = self.get_l2_enodes(ctx).await?;
        self.add_l2_engine_with_bootnodes(ctx, client_idx, &bootnodes).await
    }

    /// Start an L2 engine without boot nodes, so it can only sync through a driver.
    pub async fn add_isolated_l2_engine(
        &self,
        ctx: &Context,
        client_idx: usize,
    ) -> Result<Arc<EngineNode>, DevnetError> {
        self.add_l2_engine_with_bootnodes(ctx, client_idx, &[]).await
    }

    async fn add_l2_engine_with_bootnodes(
        &self,
        ctx: &Context,
        client_idx: usize,
        bootnodes: &[String],
    ) -> Result<Arc<EngineNode>, DevnetError> {
        let image = pick_image(&self.conf.images.l2_engine, "l2 engine", client_idx)?;
        let params = l2_engine_params(&self.conf, bootnodes);
        let node = Arc::new(self.start_engine(ctx, NodeRole::L2Engine, image, &params).await?);
        transition(NodeRole::L2Engine, node.name(), NodeState::Wired);

        self.append(|nodes| nodes.l2_engines.push(node.clone()));
        transition(NodeRole::L2Engine, node.name(), NodeState::Ready);
        Ok(node)
    }

    /// Enode URLs of all L2 engines added so far.
    pub async fn get_l2_enodes(&self, ctx: &Context) -> Result<Vec<String>, DevnetError> {
        let engines = self.l2_engines();
        let mut enodes = Vec::with_capacity(engines.len());
        for engine in engines {
            enodes.push(engine.enode_url(ctx).await?);
        }
        Ok(enodes)
    }

    /// Start a driver building blocks on `l2` from proposals on `l1`.
    pub async fn add_driver(
        &self,
        l1: &EngineNode,
        l2: &EngineNode,
        p2p_sync_verified_blocks: bool,
    ) -> Result<Arc<DriverNode>, DevnetError> {
        let image = pick_image(&self.conf.images.driver, "driver", 0)?;
        let params = driver_params(&self.conf, l1, l2, p2p_sync_verified_blocks)?;
        transition(NodeRole::Driver, "", NodeState::Starting);
        let endpoint = self.launcher.start(NodeRole::Driver, image, &params).await?;

        let node = Arc::new(DriverNode { endpoint });
        self.append(|nodes| nodes.drivers.push(node.clone()));
        transition(NodeRole::Driver, &node.endpoint.name, NodeState::Ready);
        Ok(node)
    }

    /// Start a proposer submitting `l2` transactions to the rollup contract on `l1`.
    pub async fn add_proposer(
        &self,
        l1: &EngineNode,
        l2: &EngineNode,
    ) -> Result<Arc<ProposerNode>, DevnetError> {
        let image = pick_image(&self.conf.images.proposer, "proposer", 0)?;
        let params = proposer_params(&self.conf, l1, l2)?;
        transition(NodeRole::Proposer, "", NodeState::Starting);
        let endpoint = self.launcher.start(NodeRole::Proposer, image, &params).await?;

        let node = Arc::new(ProposerNode { endpoint });
        self.append(|nodes| nodes.proposers.push(node.clone()));
        transition(NodeRole::Proposer, &node.endpoint.name, NodeState::Ready);
        Ok(node)
    }

    /// Whitelist the configured prover on `l1`, then start it.
    ///
    /// The prover is never started if the whitelist transaction does not succeed.
    pub async fn add_prover(
        &self,
        ctx: &Context,
        l1: &EngineNode,
        l2: &EngineNode,
    ) -> Result<Arc<ProverNode>, DevnetError> {
        let image = pick_image(&self.conf.images.prover, "prover", 0)?;
        let address = self.conf.l2.prover.address()?;
        let params = prover_params(&self.conf, l1, l2)?;

        let client = l1.eth_client().await?;
        rollup::whitelist_prover(
            ctx,
            (*client).clone(),
            self.conf.l1.chain_id,
            self.conf.l1.deployer.wallet()?,
            l1.rollup_address(),
            address,
        )
        .await
        .map_err(|e| {
            transition(NodeRole::Prover, "", NodeState::Absent);
            DevnetError::Whitelist(e.to_string())
        })?;
        transition(NodeRole::Prover, "", NodeState::Wired);

        let endpoint = self.launcher.start(NodeRole::Prover, image, &params).await?;
        let node = Arc::new(ProverNode { endpoint, address });
        self.append(|nodes| nodes.provers.push(node.clone()));
        transition(NodeRole::Prover, &node.endpoint.name, NodeState::Ready);
        Ok(node)
    }

    async fn start_engine(
        &self,
        ctx: &Context,
        role: NodeRole,
        image: &str,
        params: &StartParams,
    ) -> Result<EngineNode, DevnetError> {
        transition(role, "", NodeState::Starting);
        let endpoint = self.launcher.start(role, image, params).await?;
        let rollup_address = match role {
            NodeRole::L1Engine => self.conf.l1.rollup_address,
            _ => self.conf.l2.rollup_address,
        };
        let mut node = EngineNode::new(role, endpoint, rollup_address);
        if role == NodeRole::L2Engine {
            node = node.with_jwt_secret(&self.conf.l2.jwt_secret);
        }

        let client = node.eth_client().await?;
        let chain_id = wait::wait_for_engine_up(ctx, &*client, ENGINE_UP_TIMEOUT)
            .await
            .map_err(|e| {
                transition(role, node.name(), NodeState::Absent);
                DevnetError::EngineNotUp(node.name().to_string(), ENGINE_UP_TIMEOUT, e.to_string())
            })?;
        debug!(%role, service = node.name(), chain_id, "engine answering");
        Ok(node)
    }

    // Runs the deploy script in a one-shot protocol container pointed at `l1`.
    async fn deploy_l1_contracts(&self, ctx: &Context, l1: &EngineNode) -> Result<(), DevnetError> {
        let image = self
            .conf
            .images
            .protocol
            .as_deref()
            .ok_or(DevnetError::NoClientType("protocol"))?;
        let params = contract_deployer_params(&self.conf, l1)?;
        let deployment_failed = |reason: String| {
            DevnetError::ContractDeployment(l1.name().to_string(), reason)
        };

        let endpoint = self
            .launcher
            .start(NodeRole::ContractDeployer, image, &params)
            .await
            .map_err(|e| deployment_failed(e.to_string()))?;
        let result = ctx
            .run(self.launcher.exec(&endpoint, DEPLOY_SCRIPT))
            .await
            .map_err(|e| deployment_failed(e.to_string()))?
            .map_err(|e| deployment_failed(e.to_string()))?;
        if !result.success() {
            return Err(deployment_failed(format!(
                "exit code {}: {}",
                result.exit_code, result.output
            )));
        }

        info!(engine = l1.name(), deployer = %endpoint.name, "Deployed rollup contracts");
        let node = Arc::new(ContractNode { endpoint });
        self.append(|nodes| nodes.contracts.push(node));
        Ok(())
    }

    pub fn get_l1_engine(&self, index: usize) -> Result<Arc<EngineNode>, DevnetError> {
        pick(&self.nodes().l1_engines, "L1 engine", index)
    }

    pub fn get_l2_engine(&self, index: usize) -> Result<Arc<EngineNode>, DevnetError> {
        pick(&self.nodes().l2_engines, "L2 engine", index)
    }

    pub fn get_driver(&self, index: usize) -> Result<Arc<DriverNode>, DevnetError> {
        pick(&self.nodes().drivers, "driver", index)
    }

    pub fn get_proposer(&self, index: usize) -> Result<Arc<ProposerNode>, DevnetError> {
        pick(&self.nodes().proposers, "proposer", index)
    }

    pub fn get_prover(&self, index: usize) -> Result<Arc<ProverNode>, DevnetError> {
        pick(&self.nodes().provers, "prover", index)
    }

    pub fn l2_engines(&self) -> Vec<Arc<EngineNode>> {
        self.nodes().l2_engines.clone()
    }

    /// Number of contract deployments run so far.
    pub fn contract_deployments(&self) -> usize {
        self.nodes().contracts.len()
    }

    /// One L1 engine, one L2 engine and a proposer.
    pub async fn start_base_net(&self, ctx: &Context) -> Result<(), DevnetError> {
        let (l1, l2) = self.start_l1_l2(ctx).await?;
        self.add_proposer(&l1, &l2).await?;
        Ok(())
    }

    /// One L1 engine and one L2 engine, no rollup processes.
    pub async fn start_l1_l2(
        &self,
        ctx: &Context,
    ) -> Result<(Arc<EngineNode>, Arc<EngineNode>), DevnetError> {
        let l1 = self.add_l1_engine(ctx, 0).await?;
        let l2 = self.add_l2_engine(ctx, 0).await?;
        Ok((l1, l2))
    }

    /// One L1 engine, one L2 engine and a driver.
    pub async fn start_l1_l2_driver(
        &self,
        ctx: &Context,
    ) -> Result<(Arc<EngineNode>, Arc<EngineNode>), DevnetError> {
        let (l1, l2) = self.start_l1_l2(ctx).await?;
        self.add_driver(&l1, &l2, false).await?;
        Ok((l1, l2))
    }

    /// Complete single-node rollup: engines, driver, prover and proposer.
    pub async fn start_single_node_net(&self, ctx: &Context) -> Result<(), DevnetError> {
        let (l1, l2) = self.start_l1_l2_driver(ctx).await?;
        self.add_prover(ctx, &l1, &l2).await?;
        self.add_proposer(&l1, &l2).await?;
        Ok(())
    }

    /// Tear down every node the launcher started.
    pub async fn destroy(&self) -> Result<(), DevnetError> {
        Ok(self.launcher.teardown().await?)
    }
}

fn transition(role: NodeRole, service: &str, state: NodeState) {
    match state {
        NodeState::Absent => warn!(%role, service, ?state, "node dropped"),
        _ => debug!(%role, service, ?state, "node state"),
    }
}

fn pick_image<'a>(
    images: &'a [String],
    role: &'static str,
    index: usize,
) -> Result<&'a str, DevnetError> {
    images
        .get(index)
        .map(String::as_str)
        .ok_or(DevnetError::NoClientType(role))
}

fn pick<T>(nodes: &[Arc<T>], role: &'static str, index: usize) -> Result<Arc<T>, DevnetError> {
    nodes.get(index).cloned().ok_or(DevnetError::NodeIndex {
        role,
        count: nodes.len(),
        index,
    })
}

pub fn l1_engine_params(conf: &Config) -> StartParams {
    StartParams::new()
        .set(env::L1_CHAIN_ID, conf.l1.chain_id)
        .set(env::L1_CLIQUE_PERIOD, conf.l1.mine_interval)
}

/// Boot nodes are joined with commas, the form engine images accept.
pub fn l2_engine_params(conf: &Config, bootnodes: &[String]) -> StartParams {
    let params = StartParams::new()
        .set(env::NETWORK_ID, conf.l2.network_id)
        .set(env::JWT_SECRET, &conf.l2.jwt_secret);
    if bootnodes.is_empty() {
        params
    } else {
        params.set(env::BOOTNODES, bootnodes.join(","))
    }
}

pub fn driver_params(
    conf: &Config,
    l1: &EngineNode,
    l2: &EngineNode,
    p2p_sync_verified_blocks: bool,
) -> Result<StartParams, LaunchError> {
    let params = StartParams::new()
        .set(env::ROLE, NodeRole::Driver)
        .set(env::L1_RPC_ENDPOINT, l1.ws_rpc_endpoint()?)
        .set(env::L2_RPC_ENDPOINT, l2.ws_rpc_endpoint()?)
        .set(env::L2_ENGINE_ENDPOINT, l2.engine_endpoint()?)
        .set(env::L1_ROLLUP_ADDRESS, format!("{:?}", conf.l1.rollup_address))
        .set(env::L2_ROLLUP_ADDRESS, format!("{:?}", conf.l2.rollup_address))
        .set(env::THROWAWAY_BLOCK_BUILDER_PRIVATE_KEY, conf.l2.throwaway.hex())
        .set(env::JWT_SECRET, &conf.l2.jwt_secret);
    Ok(if p2p_sync_verified_blocks {
        params.set(env::P2P_SYNC_VERIFIED_BLOCKS, true)
    } else {
        params
    })
}

pub fn proposer_params(
    conf: &Config,
    l1: &EngineNode,
    l2: &EngineNode,
) -> Result<StartParams, LaunchError> {
    let params = StartParams::new()
        .set(env::ROLE, NodeRole::Proposer)
        .set(env::L1_RPC_ENDPOINT, l1.ws_rpc_endpoint()?)
        .set(env::L2_RPC_ENDPOINT, l2.ws_rpc_endpoint()?)
        .set(env::L1_ROLLUP_ADDRESS, format!("{:?}", conf.l1.rollup_address))
        .set(env::L2_ROLLUP_ADDRESS, format!("{:?}", conf.l2.rollup_address))
        .set(env::PROPOSER_PRIVATE_KEY, conf.l2.proposer.hex())
        .set(
            env::SUGGESTED_FEE_RECIPIENT,
            format!("{:?}", conf.l2.suggested_fee_recipient),
        )
        .set(env::PROPOSE_INTERVAL, format!("{}s", conf.l2.propose_interval_secs));
    Ok(match conf.l2.produce_invalid_blocks_interval {
        0 => params,
        interval => params.set(env::PRODUCE_INVALID_BLOCKS_INTERVAL, interval),
    })
}

pub fn prover_params(
    conf: &Config,
    l1: &EngineNode,
    l2: &EngineNode,
) -> Result<StartParams, LaunchError> {
    Ok(StartParams::new()
        .set(env::ROLE, NodeRole::Prover)
        .set(env::L1_RPC_ENDPOINT, l1.ws_rpc_endpoint()?)
        .set(env::L2_RPC_ENDPOINT, l2.ws_rpc_endpoint()?)
        .set(env::L1_ROLLUP_ADDRESS, format!("{:?}", conf.l1.rollup_address))
        .set(env::L2_ROLLUP_ADDRESS, format!("{:?}", conf.l2.rollup_address))
        .set(env::PROVER_PRIVATE_KEY, conf.l2.prover.hex()))
}

pub fn contract_deployer_params(
    conf: &Config,
    l1: &EngineNode,
) -> Result<StartParams, DevnetError> {
    Ok(StartParams::new()
        .set(env::DEPLOYER_PRIVATE_KEY, conf.l1.deployer.hex())
        .set(env::L1_DEPLOYER_ADDRESS, format!("{:?}", conf.l1.deployer.address()?))
        .set(env::L2_GENESIS_BLOCK_HASH, format!("{:?}", conf.l2.genesis_block_hash))
        .set(env::L2_ROLLUP_ADDRESS, format!("{:?}", conf.l2.rollup_address))
        .set(env::MAINNET_URL, l1.http_rpc_endpoint()?)
        .set(env::L2_CHAIN_ID, conf.l2.chain_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ServiceEndpoint, ServicePort};
    use ethers::types::Address;

    fn engine(role: NodeRole, name: &str) -> EngineNode {
        let ports = role
            .port_specs()
            .iter()
            .map(|(port, number)| ServicePort {
                name: port.to_string(),
                private_port: *number,
                public_addr: format!("127.0.0.1:{}", 40000 + number),
            })
            .collect();
        EngineNode::new(
            role,
            ServiceEndpoint {
                name: name.to_string(),
                uuid: "000000000000".to_string(),
                ports,
            },
            Address::zero(),
        )
    }

    #[test]
    fn bootnodes_are_comma_joined() {
        let conf = Config::default();
        let enodes = vec![
            "enode://a@l2-engine-0:30303".to_string(),
            "enode://b@l2-engine-1:30303".to_string(),
        ];
        let params = l2_engine_params(&conf, &enodes);
        assert_eq!(
            params.get(env::BOOTNODES),
            Some("enode://a@l2-engine-0:30303,enode://b@l2-engine-1:30303")
        );
        assert_eq!(l2_engine_params(&conf, &[]).get(env::BOOTNODES), None);
    }

    #[test]
    fn driver_talks_to_engines_over_enclave_urls() {
        let conf = Config::default();
        let l1 = engine(NodeRole::L1Engine, "l1-engine-0");
        let l2 = engine(NodeRole::L2Engine, "l2-engine-0");
        let params = driver_params(&conf, &l1, &l2, true).unwrap();
        assert_eq!(params.get(env::ROLE), Some("driver"));
        assert_eq!(params.get(env::L1_RPC_ENDPOINT), Some("ws://l1-engine-0:8546"));
        assert_eq!(params.get(env::L2_ENGINE_ENDPOINT), Some("http://l2-engine-0:8551"));
        assert_eq!(params.get(env::P2P_SYNC_VERIFIED_BLOCKS), Some("true"));
        assert_eq!(params.get(env::JWT_SECRET), Some(conf.l2.jwt_secret.as_str()));

        let params = driver_params(&conf, &l1, &l2, false).unwrap();
        assert_eq!(params.get(env::P2P_SYNC_VERIFIED_BLOCKS), None);
    }

    #[test]
    fn invalid_block_interval_only_when_enabled() {
        let mut conf = Config::default();
        let l1 = engine(NodeRole::L1Engine, "l1-engine-0");
        let l2 = engine(NodeRole::L2Engine, "l2-engine-0");
        let params = proposer_params(&conf, &l1, &l2).unwrap();
        assert_eq!(params.get(env::PRODUCE_INVALID_BLOCKS_INTERVAL), None);
        assert_eq!(params.get(env::PROPOSE_INTERVAL), Some("1s"));

        conf.l2.produce_invalid_blocks_interval = 5;
        let params = proposer_params(&conf, &l1, &l2).unwrap();
        assert_eq!(params.get(env::PRODUCE_INVALID_BLOCKS_INTERVAL), Some("5"));
    }

    #[test]
    fn deployer_targets_l1_rpc() {
        let conf = Config::default();
        let l1 = engine(NodeRole::L1Engine, "l1-engine-0");
        let params = contract_deployer_params(&conf, &l1).unwrap();
        assert_eq!(params.get(env::MAINNET_URL), Some("http://l1-engine-0:8545"));
        assert_eq!(params.get(env::DEPLOYER_PRIVATE_KEY), Some(conf.l1.deployer.hex()));
        assert_eq!(params.get(env::L2_CHAIN_ID), Some("167"));
    }

    #[test]
    fn driver_params_need_engine_ports() {
        let conf = Config::default();
        let l1 = engine(NodeRole::L1Engine, "l1-engine-0");
        let portless = engine(NodeRole::Driver, "l2-engine-0");
        assert!(matches!(
            driver_params(&conf, &l1, &portless, false),
            Err(LaunchError::MissingPort(_, _))
        ));
    }
}
