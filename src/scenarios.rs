//! Rollup scenarios run through the scheduler.
//!
//! The single node scenarios expect a devnet started with
//! [`Devnet::start_single_node_net`](crate::devnet::Devnet::start_single_node_net).
//! [`too_many_pending_blocks`] and the invalid proposal scenarios expect one started
//! with [`Devnet::start_l1_l2_driver`](crate::devnet::Devnet::start_l1_l2_driver), so no
//! block is ever verified.

use std::sync::Arc;
use std::time::Duration;

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::{rlp::RlpStream, WEI_IN_ETHER};
use rand::RngCore;
use tracing::info;

use crate::assertions;
use crate::constants::{VAULT_FUNDING_FEE_CAP, VAULT_FUNDING_TIP_CAP};
use crate::context::Context;
use crate::env::TestEnv;
use crate::errors::{Error, ProposeError, WaitError};
use crate::node::EngineNode;
use crate::rollup::{self, L1State, Proposer, RollupL1};
use crate::runner::TestSpec;
use crate::types::HttpClient;
use crate::wait;

/// Upper bound for the first L2 block to be proposed and proven.
const PROOF_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Upper bound for a fresh L2 engine to catch up.
const SYNC_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Upper bound for a direct proposal to show up in the protocol state.
const PROPOSAL_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Length of the random transaction list proposed as garbage.
const INVALID_TX_LIST_LEN: usize = 256;
/// Gap between the sender's pending nonce and the nonce of the invalid transaction.
const INVALID_NONCE_GAP: u64 = 1024;
const INVALID_TX_GAS: u64 = 300_000;

/// Scenarios sharing one single node devnet.
pub fn single_node_suite() -> Vec<TestSpec> {
    vec![
        TestSpec::new("first L1 block", "L1 produces blocks", first_l1_block),
        TestSpec::new(
            "first verified L2 block",
            "watch the prove event of the first L2 block on L1",
            first_verified_l2_block,
        ),
        TestSpec::new(
            "sync from L1",
            "completes sync purely from L1 data to generate L2 blocks",
            sync_all_from_l1,
        ),
        TestSpec::new(
            "sync by p2p",
            "a follower L2 engine syncs blocks through engine P2P",
            sync_by_p2p,
        ),
    ]
}

pub fn too_many_pending_blocks_spec() -> TestSpec {
    TestSpec::new(
        "too many pending blocks",
        "too many pending blocks will block further proposals",
        too_many_pending_blocks,
    )
}

/// Proposals the L2 side cannot execute. The rollup contract accepts them anyway.
pub fn invalid_proposals_suite() -> Vec<TestSpec> {
    vec![
        TestSpec::new(
            "propose invalid tx list bytes",
            "a transaction list that is not RLP still takes a block id",
            propose_invalid_tx_list_bytes,
        ),
        TestSpec::new(
            "propose tx list including invalid tx",
            "a well formed transaction list with a gapped nonce still takes a block id",
            propose_tx_list_including_invalid_tx,
        ),
    ]
}

pub async fn first_l1_block(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?.ws_client().await?;
    let ctx = env.timeout_ctx(env.conf.l2.propose_interval() + env.conf.rpc_timeout());
    let head = wait::wait_for_new_head(&ctx, &*l1, 1).await?;
    info!(number = ?head.number, hash = ?head.hash, "L1 is producing blocks");
    Ok(())
}

/// Fund an L2 account, then wait for L2 block 1 to be proven on L1.
pub async fn first_verified_l2_block(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let l2 = env.net.get_l2_engine(0)?.eth_client().await?;

    let ctx = env.timeout_ctx(PROOF_TIMEOUT);
    let account = env
        .l2_vault()
        .create_and_fund_account(&ctx, &*l2, WEI_IN_ETHER)
        .await?;
    assertions::assert_balance(&ctx, &*l2, account, WEI_IN_ETHER).await?;
    info!(?account, "funded first L2 account");

    let ws = l1.ws_client().await?;
    let proven = rollup::wait_for_block_proven(&ctx, &*ws, l1.rollup_address(), 1).await?;
    let proven_hash = H256::from(proven.block_hash);
    let local_hash = wait::block_hash_by_number(&ctx, &*l2, 1).await?;
    if proven_hash != local_hash {
        return Err(Error::Assertion(format!(
            "L2 block 1 proven as {proven_hash:?}, engine has {local_hash:?}"
        )));
    }
    info!(block_hash = ?proven_hash, prover = ?proven.prover, "first L2 block proven");
    Ok(())
}

/// Start an unpeered L2 engine and driver, the engine must build blocks from L1 alone.
pub async fn sync_all_from_l1(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let ctx = env.timeout_ctx(SYNC_TIMEOUT);
    let l2 = env.net.add_isolated_l2_engine(&ctx, 0).await?;
    env.net.add_driver(&l1, &l2, false).await?;

    let client = l2.eth_client().await?;
    wait::wait_for_height(&ctx, &*client, 1).await?;
    Ok(())
}

/// Start a driverless L2 engine booted from the existing ones, it must follow them over P2P.
pub async fn sync_by_p2p(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let l2 = env.net.get_l2_engine(0)?.eth_client().await?;

    let ctx = env.timeout_ctx(SYNC_TIMEOUT);
    let latest = ctx
        .run(l2.get_block_number())
        .await?
        .map_err(WaitError::rpc)?
        .as_u64();
    let mut funded = Vec::with_capacity(2);
    for i in 0..2 {
        let account = env
            .l2_vault()
            .create_and_fund_account(&ctx, &*l2, WEI_IN_ETHER)
            .await?;
        wait::wait_for_height(&ctx, &*l2, latest + i + 1).await?;
        funded.push(account);
    }

    // both funding receipts are at or below this height
    let funded_height = ctx
        .run(l2.get_block_number())
        .await?
        .map_err(WaitError::rpc)?
        .as_u64();

    let follower = env.net.add_l2_engine(&ctx, 0).await?;
    let state = rollup::get_l1_state(&ctx, &l1.rollup_l1_client().await?).await?;
    let target = state.latest_verified_height.max(funded_height);
    let client = follower.eth_client().await?;
    let height = wait::wait_for_height(&ctx, &*client, target).await?;

    let expected = wait::block_hash_by_number(&ctx, &*l2, target).await?;
    let synced = wait::block_hash_by_number(&ctx, &*client, target).await?;
    if expected != synced {
        return Err(Error::Assertion(format!(
            "follower block {target} is {synced:?}, expected {expected:?}"
        )));
    }
    for account in funded {
        assertions::assert_balance(&ctx, &*client, account, WEI_IN_ETHER).await?;
    }
    info!(height, target, "follower synced by p2p");
    Ok(())
}

/// Propose until the pending block limit is reached, the next proposal must be rejected for it.
pub async fn too_many_pending_blocks(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let l2 = env.net.get_l2_engine(0)?.eth_client().await?;
    let rollup_l1 = l1.rollup_l1_client().await?;
    let proposer = direct_proposer(&env, &l1).await?;
    env.l2_vault().sync_nonce(&env.ctx(), &*l2).await?;
    initialised_l1_state(&env.ctx(), &rollup_l1).await?;

    loop {
        let ctx = env.ctx();
        let state = rollup::get_l1_state(&ctx, &rollup_l1).await?;
        if !state.can_propose(env.conf.l2.max_num_blocks) {
            break;
        }
        let tx_list = test_tx_list(&env, &ctx, &*l2).await?;
        proposer.propose_tx_list(&ctx, tx_list).await?;
    }

    let ctx = env.ctx();
    let tx_list = test_tx_list(&env, &ctx, &*l2).await?;
    match proposer.propose_tx_list(&ctx, tx_list).await {
        Err(ProposeError::TooManyPendingBlocks(reason)) => {
            info!(%reason, "proposal rejected at the pending block limit");
            Ok(())
        }
        Err(other) => Err(Error::Assertion(format!(
            "expected too many pending blocks, got: {other}"
        ))),
        Ok(receipt) => Err(Error::Assertion(format!(
            "proposal {:?} accepted beyond the pending block limit",
            receipt.transaction_hash
        ))),
    }
}

/// Propose 256 random bytes as a transaction list.
pub async fn propose_invalid_tx_list_bytes(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let proposer = direct_proposer(&env, &l1).await?;
    let rollup_l1 = l1.rollup_l1_client().await?;

    let ctx = env.timeout_ctx(PROPOSAL_TIMEOUT);
    let before = initialised_l1_state(&ctx, &rollup_l1).await?;
    let mut garbage = vec![0u8; INVALID_TX_LIST_LEN];
    rand::thread_rng().fill_bytes(&mut garbage);
    proposer.propose_tx_list(&ctx, garbage.into()).await?;

    let state = wait_for_next_block_id(&ctx, &l1, &rollup_l1, &before).await?;
    info!(next_block_id = state.next_block_id, "invalid tx list bytes proposed");
    Ok(())
}

/// Propose a transaction list holding one transaction whose nonce the sender cannot
/// have reached, then check the L2 chain never executed it.
pub async fn propose_tx_list_including_invalid_tx(env: Arc<TestEnv>) -> Result<(), Error> {
    let l1 = env.net.get_l1_engine(0)?;
    let l2 = env.net.get_l2_engine(0)?.eth_client().await?;
    let proposer = direct_proposer(&env, &l1).await?;
    let rollup_l1 = l1.rollup_l1_client().await?;

    let ctx = env.timeout_ctx(PROPOSAL_TIMEOUT);
    let sender = env.l2_vault().insert_key(env.conf.l2.proposer.wallet()?);
    let invalid_nonce = pending_nonce(&ctx, &*l2, sender).await? + INVALID_NONCE_GAP;
    let tx: TypedTransaction = Eip1559TransactionRequest::new()
        .from(sender)
        .to(sender)
        .value(1u64)
        .nonce(invalid_nonce)
        .gas(INVALID_TX_GAS)
        .max_fee_per_gas(VAULT_FUNDING_FEE_CAP)
        .max_priority_fee_per_gas(VAULT_FUNDING_TIP_CAP)
        .chain_id(env.l2_vault().chain_id())
        .into();
    let invalid_tx = env.l2_vault().sign(sender, &tx)?;

    let before = initialised_l1_state(&ctx, &rollup_l1).await?;
    proposer.propose_tx_list(&ctx, rlp_tx_list(&invalid_tx.raw)).await?;
    let state = wait_for_next_block_id(&ctx, &l1, &rollup_l1, &before).await?;

    let pending = pending_nonce(&ctx, &*l2, sender).await?;
    if pending >= invalid_nonce {
        return Err(Error::Assertion(format!(
            "invalid transaction {:?} executed, sender pending nonce is {pending}",
            invalid_tx.hash
        )));
    }
    info!(next_block_id = state.next_block_id, pending, "invalid tx skipped on L2");
    Ok(())
}

// Proposer signing with the configured proposer key, bypassing the proposer node.
async fn direct_proposer(env: &TestEnv, l1: &EngineNode) -> Result<Proposer, Error> {
    let client = l1.eth_client().await?;
    Ok(Proposer::new(
        (*client).clone(),
        env.conf.l1.chain_id,
        env.conf.l2.proposer.wallet()?,
        l1.rollup_address(),
        env.conf.l2.suggested_fee_recipient,
    ))
}

// The deployment initialises the protocol state before any proposal.
async fn initialised_l1_state(
    ctx: &Context,
    rollup_l1: &RollupL1<HttpClient>,
) -> Result<L1State, Error> {
    Ok(rollup::wait_for_l1_state(ctx, rollup_l1, |state| state.next_block_id > 0).await?)
}

// Waits for L1 to move past genesis and for the proposal after `before` to be counted.
async fn wait_for_next_block_id(
    ctx: &Context,
    l1: &EngineNode,
    rollup_l1: &RollupL1<HttpClient>,
    before: &L1State,
) -> Result<L1State, Error> {
    let client = l1.eth_client().await?;
    wait::wait_for_height(ctx, &*client, 1).await?;
    let target = before.next_block_id + 1;
    Ok(rollup::wait_for_l1_state(ctx, rollup_l1, |state| state.next_block_id >= target).await?)
}

async fn pending_nonce<M: Middleware>(
    ctx: &Context,
    client: &M,
    account: Address,
) -> Result<u64, Error> {
    let nonce = ctx
        .run(client.get_transaction_count(account, Some(BlockNumber::Pending.into())))
        .await?
        .map_err(WaitError::rpc)?;
    Ok(nonce.as_u64())
}

// Broadcasts one L2 test transaction and wraps it as a transaction list.
async fn test_tx_list<M: Middleware>(
    env: &TestEnv,
    ctx: &Context,
    l2: &M,
) -> Result<Bytes, Error> {
    let tx = env.l2_vault().send_test_tx(ctx, l2).await?;
    Ok(rlp_tx_list(&tx.raw))
}

/// RLP list holding one signed transaction.
pub fn rlp_tx_list(raw_tx: &Bytes) -> Bytes {
    let mut stream = RlpStream::new_list(1);
    stream.append(&raw_tx.to_vec());
    stream.out().freeze().into()
}
