//! Blocking observation primitives over asynchronous chain state.
//!
//! Every function blocks the calling task until the observed condition holds, the
//! node returns a hard error, or the caller's [`Context`] ends. Polling intervals are
//! short relative to block time so the added latency stays small.

use std::future::Future;
use std::time::Duration;

use ethers::contract::{parse_log, EthLogDecode};
use ethers::prelude::*;
use futures_util::{pin_mut, StreamExt};
use tokio::time::Instant;
use tracing::debug;

use crate::constants::{
    ENGINE_UP_POLL_INTERVAL, HEIGHT_POLL_INTERVAL, RECEIPT_POLL_INTERVAL, STATE_POLL_INTERVAL,
};
use crate::context::Context;
use crate::errors::WaitError;

/// Post-byzantium receipt status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Failed = 0,
    Successful = 1,
}

impl ReceiptStatus {
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Sleep for `interval`, or return the context error if it ends first.
async fn tick(ctx: &Context, interval: Duration) -> Result<(), WaitError> {
    tokio::select! {
        _ = tokio::time::sleep(interval) => Ok(()),
        err = ctx.done() => Err(err.into()),
    }
}

/// Block until the chain height reaches `target`, returning the observed height.
///
/// RPC errors are returned immediately, not retried.
pub async fn wait_for_height<M: Middleware>(
    ctx: &Context,
    client: &M,
    target: u64,
) -> Result<u64, WaitError> {
    loop {
        let height = ctx
            .run(client.get_block_number())
            .await?
            .map_err(WaitError::rpc)?
            .as_u64();
        if height >= target {
            return Ok(height);
        }
        tick(ctx, HEIGHT_POLL_INTERVAL).await?;
    }
}

/// Block until `hash` has a receipt and compare its status to `expected`.
///
/// A missing receipt is retried. A receipt with another status is returned inside
/// [`WaitError::StatusMismatch`], so callers can tell "never landed" from "landed but
/// failed".
pub async fn wait_for_receipt<M: Middleware>(
    ctx: &Context,
    client: &M,
    hash: TxHash,
    expected: ReceiptStatus,
) -> Result<TransactionReceipt, WaitError> {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + RECEIPT_POLL_INTERVAL,
        RECEIPT_POLL_INTERVAL,
    );
    loop {
        let receipt = ctx
            .run(client.get_transaction_receipt(hash))
            .await?
            .map_err(WaitError::rpc)?;
        match receipt {
            Some(receipt) => {
                let actual = receipt.status.map(|s| s.as_u64()).unwrap_or_default();
                if actual != expected.code() {
                    return Err(WaitError::StatusMismatch {
                        expected: expected.code(),
                        actual,
                        receipt: Box::new(receipt),
                    });
                }
                return Ok(receipt);
            }
            None => tokio::select! {
                _ = ticker.tick() => {}
                err = ctx.done() => return Err(err.into()),
            },
        }
    }
}

pub async fn wait_receipt_ok<M: Middleware>(
    ctx: &Context,
    client: &M,
    hash: TxHash,
) -> Result<TransactionReceipt, WaitError> {
    wait_for_receipt(ctx, client, hash, ReceiptStatus::Successful).await
}

pub async fn wait_receipt_failed<M: Middleware>(
    ctx: &Context,
    client: &M,
    hash: TxHash,
) -> Result<TransactionReceipt, WaitError> {
    wait_for_receipt(ctx, client, hash, ReceiptStatus::Failed).await
}

/// Block until a new head with number at least `target` is announced.
pub async fn wait_for_new_head<M>(
    ctx: &Context,
    client: &M,
    target: u64,
) -> Result<Block<TxHash>, WaitError>
where
    M: Middleware,
    M::Provider: PubsubClient,
{
    let heads = ctx
        .run(client.subscribe_blocks())
        .await?
        .map_err(WaitError::rpc)?;
    pin_mut!(heads);
    loop {
        tokio::select! {
            head = heads.next() => match head {
                Some(head) => {
                    if head.number.map_or(false, |n| n.as_u64() >= target) {
                        return Ok(head);
                    }
                }
                None => return Err(WaitError::SubscriptionClosed("new heads".to_string())),
            },
            err = ctx.done() => return Err(err.into()),
        }
    }
}

/// Block until a log matching `filter` decodes into an event accepted by `matches`.
///
/// Logs already on chain from the filter's start block are checked first, then new
/// logs are followed through a subscription.
pub async fn wait_for_event<M, D, F>(
    ctx: &Context,
    client: &M,
    filter: &Filter,
    mut matches: F,
) -> Result<D, WaitError>
where
    M: Middleware,
    M::Provider: PubsubClient,
    D: EthLogDecode,
    F: FnMut(&D) -> bool,
{
    // subscribe before the back-fill so nothing lands between the two
    let live_filter = Filter {
        block_option: FilterBlockOption::default(),
        ..filter.clone()
    };
    let logs = ctx
        .run(client.subscribe_logs(&live_filter))
        .await?
        .map_err(WaitError::rpc)?;
    pin_mut!(logs);

    let past = ctx
        .run(client.get_logs(filter))
        .await?
        .map_err(WaitError::rpc)?;
    for log in past {
        let event = decode_log::<D>(log)?;
        if matches(&event) {
            return Ok(event);
        }
    }

    loop {
        tokio::select! {
            log = logs.next() => match log {
                Some(log) => {
                    let event = decode_log::<D>(log)?;
                    if matches(&event) {
                        return Ok(event);
                    }
                }
                None => return Err(WaitError::SubscriptionClosed("logs".to_string())),
            },
            err = ctx.done() => return Err(err.into()),
        }
    }
}

fn decode_log<D: EthLogDecode>(log: Log) -> Result<D, WaitError> {
    parse_log::<D>(log).map_err(|e| WaitError::Decode(e.to_string()))
}

/// Poll a state snapshot until `predicate` accepts it.
pub async fn wait_for_state<S, F, Fut, P>(
    ctx: &Context,
    mut fetch: F,
    mut predicate: P,
) -> Result<S, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, WaitError>>,
    P: FnMut(&S) -> bool,
{
    loop {
        let state = ctx.run(fetch()).await??;
        if predicate(&state) {
            return Ok(state);
        }
        tick(ctx, STATE_POLL_INTERVAL).await?;
    }
}

/// Poll `eth_chainId` until the node answers or `timeout` elapses.
pub async fn wait_for_engine_up<M: Middleware>(
    ctx: &Context,
    client: &M,
    timeout: Duration,
) -> Result<u64, WaitError> {
    let ctx = ctx.with_timeout(timeout);
    loop {
        match ctx.run(client.get_chainid()).await? {
            Ok(chain_id) => return Ok(chain_id.as_u64()),
            Err(e) => debug!(error = %e, "engine not answering yet"),
        }
        tick(&ctx, ENGINE_UP_POLL_INTERVAL).await?;
    }
}

/// Hash of the canonical block at `number`.
pub async fn block_hash_by_number<M: Middleware>(
    ctx: &Context,
    client: &M,
    number: u64,
) -> Result<H256, WaitError> {
    ctx.run(client.get_block(number))
        .await?
        .map_err(WaitError::rpc)?
        .and_then(|block| block.hash)
        .ok_or_else(|| WaitError::Rpc(format!("block {number} not found")))
}
