mod common;

use std::time::Duration;

use common::RpcServer;
use ethers::prelude::*;
use rollup_hive::assertions::{assert_balance, assert_nonce};
use rollup_hive::errors::{Error, WaitError};
use rollup_hive::wait;
use rollup_hive::Context;
use serde_json::json;

const BLOCK_ONE: H256 = H256::repeat_byte(0x11);

async fn setup_chain() -> (RpcServer, Provider<Http>) {
    let server = RpcServer::start(|method, params| match method {
        "eth_getBalance" => Some(json!(U256::exp10(18))),
        "eth_getTransactionCount" => Some(json!(U256::from(3))),
        "eth_getBlockByNumber" => match params[0].as_str() {
            Some("0x1") => Some(json!(Block::<TxHash> {
                hash: Some(BLOCK_ONE),
                number: Some(U64::one()),
                ..Default::default()
            })),
            _ => Some(serde_json::Value::Null),
        },
        _ => None,
    })
    .await;
    let provider = Provider::<Http>::try_from(format!("http://{}", server.addr)).unwrap();
    (server, provider)
}

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn balance_matches() {
    let (_server, provider) = setup_chain().await;
    assert_balance(&ctx(), &provider, Address::random(), U256::exp10(18))
        .await
        .unwrap();
}

#[tokio::test]
async fn balance_mismatch_is_an_assertion_failure() {
    let (_server, provider) = setup_chain().await;
    let err = assert_balance(&ctx(), &provider, Address::random(), U256::one())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Assertion(msg) if msg.contains("expected 1")));
}

#[tokio::test]
async fn nonce_is_compared() {
    let (_server, provider) = setup_chain().await;
    let account = Address::random();
    assert_nonce(&ctx(), &provider, account, 3).await.unwrap();
    assert!(matches!(
        assert_nonce(&ctx(), &provider, account, 4).await,
        Err(Error::Assertion(_))
    ));
}

#[tokio::test]
async fn block_hash_is_looked_up_by_number() {
    let (_server, provider) = setup_chain().await;
    assert_eq!(
        wait::block_hash_by_number(&ctx(), &provider, 1).await.unwrap(),
        BLOCK_ONE
    );
    assert!(matches!(
        wait::block_hash_by_number(&ctx(), &provider, 7).await,
        Err(WaitError::Rpc(msg)) if msg.contains("block 7")
    ));
}
