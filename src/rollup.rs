//! Rollup contract bindings and the observations built on them.

use std::sync::Arc;

use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use tracing::info;

use crate::constants::{PROPOSE_GAS_LIMIT, WHITELIST_TIP_CAP};
use crate::context::Context;
use crate::errors::{ProposeError, WaitError};
use crate::types::{EthRpcClient, HttpClient};
use crate::wait;

abigen!(
    RollupL1,
    r#"[
        function getStateVariables() external view returns (uint64, uint64, uint64, uint64)
        function whitelistProver(address prover, bool whitelisted) external
        function proposeBlock(bytes[] inputs) external
        event BlockProven(uint256 indexed id, bytes32 parentHash, bytes32 blockHash, address prover, uint64 provenAt)
    ]"#,
);

/// Snapshot of the rollup contract's protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct L1State {
    pub genesis_height: u64,
    pub latest_verified_height: u64,
    pub latest_verified_id: u64,
    pub next_block_id: u64,
}

impl L1State {
    /// Whether one more proposal fits under the pending block limit.
    pub fn can_propose(&self, max_num_blocks: u64) -> bool {
        self.next_block_id < self.latest_verified_id + max_num_blocks
    }
}

pub async fn get_l1_state<M: Middleware>(
    ctx: &Context,
    rollup: &RollupL1<M>,
) -> Result<L1State, WaitError> {
    let (genesis_height, latest_verified_height, latest_verified_id, next_block_id) = ctx
        .run(rollup.get_state_variables().call())
        .await?
        .map_err(|e| WaitError::Contract(e.to_string()))?;
    Ok(L1State {
        genesis_height,
        latest_verified_height,
        latest_verified_id,
        next_block_id,
    })
}

/// Poll the protocol state until `predicate` accepts a snapshot.
pub async fn wait_for_l1_state<M, P>(
    ctx: &Context,
    rollup: &RollupL1<M>,
    predicate: P,
) -> Result<L1State, WaitError>
where
    M: Middleware,
    P: FnMut(&L1State) -> bool,
{
    wait::wait_for_state(ctx, || get_l1_state(ctx, rollup), predicate).await
}

/// Block until the rollup contract emits `BlockProven` for L2 block `block_id`.
pub async fn wait_for_block_proven<M>(
    ctx: &Context,
    client: &M,
    rollup_address: Address,
    block_id: u64,
) -> Result<BlockProvenFilter, WaitError>
where
    M: Middleware,
    M::Provider: PubsubClient,
{
    let filter = Filter::new()
        .address(rollup_address)
        .topic0(BlockProvenFilter::signature())
        .topic1(H256::from_low_u64_be(block_id))
        .from_block(0u64);
    let id = U256::from(block_id);
    wait::wait_for_event(ctx, client, &filter, |event: &BlockProvenFilter| event.id == id).await
}

/// Grant `prover` permission to submit proofs, confirmed by a successful receipt.
pub async fn whitelist_prover(
    ctx: &Context,
    client: HttpClient,
    chain_id: u64,
    owner: LocalWallet,
    rollup_address: Address,
    prover: Address,
) -> Result<TransactionReceipt, WaitError> {
    let signer = Arc::new(SignerMiddleware::new(client, owner.with_chain_id(chain_id)));
    let rollup = RollupL1::new(rollup_address, signer.clone());
    let mut call = rollup.whitelist_prover(prover, true);
    if let TypedTransaction::Eip1559(tx) = &mut call.tx {
        tx.max_priority_fee_per_gas = Some(WHITELIST_TIP_CAP.into());
    }
    let hash = ctx
        .run(call.send())
        .await?
        .map_err(|e| WaitError::Contract(e.to_string()))?
        .tx_hash();
    let receipt = wait::wait_receipt_ok(ctx, &*signer, hash).await?;
    info!(?prover, height = ?receipt.block_number, "Add prover to whitelist finished");
    Ok(receipt)
}

/// In-process proposer submitting transaction lists straight to the rollup contract.
pub struct Proposer {
    rollup: RollupL1<EthRpcClient>,
    signer: Arc<EthRpcClient>,
    beneficiary: Address,
}

impl Proposer {
    pub fn new(
        client: HttpClient,
        chain_id: u64,
        key: LocalWallet,
        rollup_address: Address,
        beneficiary: Address,
    ) -> Self {
        let signer = Arc::new(SignerMiddleware::new(client, key.with_chain_id(chain_id)));
        Self {
            rollup: RollupL1::new(rollup_address, signer.clone()),
            signer,
            beneficiary,
        }
    }

    /// Propose `tx_list` as the next L2 block and wait for the proposal to land.
    pub async fn propose_tx_list(
        &self,
        ctx: &Context,
        tx_list: Bytes,
    ) -> Result<TransactionReceipt, ProposeError> {
        let input = ethers::abi::encode(&[
            Token::Address(self.beneficiary),
            Token::Uint(PROPOSE_GAS_LIMIT.into()),
            Token::FixedBytes(keccak256(&tx_list).to_vec()),
        ]);
        let call = self.rollup.propose_block(vec![Bytes::from(input), tx_list]);
        let hash = ctx
            .run(call.send())
            .await
            .map_err(WaitError::from)?
            .map_err(|e| propose_failure(&e))?
            .tx_hash();
        match wait::wait_receipt_ok(ctx, &*self.signer, hash).await {
            Ok(receipt) => Ok(receipt),
            Err(WaitError::StatusMismatch { receipt, .. }) => Err(ProposeError::Rejected(format!(
                "proposal {:?} reverted in block {:?}",
                receipt.transaction_hash, receipt.block_number
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

// Node revert errors carry the reason only ABI encoded in their data.
fn propose_failure<M: Middleware>(err: &ContractError<M>) -> ProposeError {
    match err.decode_revert::<String>() {
        Some(reason) => classify_propose_failure(reason),
        None => classify_propose_failure(err.to_string()),
    }
}

/// Sort a rejected proposal by its revert reason.
pub fn classify_propose_failure(reason: String) -> ProposeError {
    if reason.contains("L1:tooMany") || reason.contains("L1_TOO_MANY_BLOCKS") {
        ProposeError::TooManyPendingBlocks(reason)
    } else {
        ProposeError::Rejected(reason)
    }
}
