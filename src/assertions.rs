//! Assertions over account state, failing the test with [`Error::Assertion`].

use ethers::prelude::*;

use crate::context::Context;
use crate::errors::{Error, WaitError};

pub async fn assert_balance<M: Middleware>(
    ctx: &Context,
    client: &M,
    account: Address,
    expected: U256,
) -> Result<(), Error> {
    let balance = ctx
        .run(client.get_balance(account, None))
        .await?
        .map_err(WaitError::rpc)?;
    if balance != expected {
        return Err(Error::Assertion(format!(
            "balance of {account:?}: expected {expected}, got {balance}"
        )));
    }
    Ok(())
}

/// Compare the latest nonce of `account` with `expected`.
pub async fn assert_nonce<M: Middleware>(
    ctx: &Context,
    client: &M,
    account: Address,
    expected: u64,
) -> Result<(), Error> {
    let nonce = ctx
        .run(client.get_transaction_count(account, None))
        .await?
        .map_err(WaitError::rpc)?
        .as_u64();
    if nonce != expected {
        return Err(Error::Assertion(format!(
            "nonce of {account:?}: expected {expected}, got {nonce}"
        )));
    }
    Ok(())
}
