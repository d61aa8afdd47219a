//! Account vault: mints funded test accounts without nonce collisions.
//!
//! A vault owns one genesis-funded account per chain. Every funding transaction takes
//! its nonce from a single lock-guarded counter, so any number of concurrently running
//! tests can create and fund accounts from the same genesis account.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use ethers::{prelude::*, types::transaction::eip2718::TypedTransaction};
use tracing::{debug, info};

use crate::constants::{
    VAULT_FUNDING_FEE_CAP, VAULT_FUNDING_GAS_LIMIT, VAULT_FUNDING_TIP_CAP,
    VAULT_RECEIPT_ATTEMPTS, VAULT_RECEIPT_INTERVAL,
};
use crate::context::Context;
use crate::eoa::Account;
use crate::errors::VaultError;

/// Signed, RLP encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: TxHash,
}

struct VaultState {
    /// Next nonce of the funding account.
    nonce: u64,
    accounts: HashMap<Address, Account>,
}

pub struct Vault {
    chain_id: u64,
    funder: LocalWallet,
    state: Mutex<VaultState>,
}

impl Vault {
    /// Create a vault funding accounts from `funder` on chain `chain_id`.
    pub fn new(chain_id: u64, funder: LocalWallet) -> Self {
        Self {
            chain_id,
            funder: funder.with_chain_id(chain_id),
            state: Mutex::new(VaultState {
                nonce: 0,
                accounts: HashMap::new(),
            }),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the genesis account paying for funding transactions.
    pub fn funder_address(&self) -> Address {
        self.funder.address()
    }

    /// Nonce the next funding transaction will use.
    pub fn nonce(&self) -> u64 {
        self.state().nonce
    }

    fn state(&self) -> MutexGuard<'_, VaultState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a new account key, store it and return its address.
    pub fn generate_account(&self) -> Address {
        let account = Account::generate();
        let address = account.address();
        self.state().accounts.insert(address, account);
        address
    }

    /// Private key held for `address`, if this vault generated or admitted it.
    pub fn find_key(&self, address: Address) -> Option<LocalWallet> {
        self.state()
            .accounts
            .get(&address)
            .map(|account| account.wallet().clone())
    }

    /// Admit an externally supplied key, e.g. a pre-funded genesis account.
    pub fn insert_key(&self, wallet: LocalWallet) -> Address {
        let account = Account::from_wallet(wallet);
        let address = account.address();
        self.state().accounts.insert(address, account);
        address
    }

    /// Chain-id bound signing key for a held account.
    pub fn keyed_signer(&self, address: Address) -> Result<LocalWallet, VaultError> {
        self.find_key(address)
            .map(|wallet| wallet.with_chain_id(self.chain_id))
            .ok_or(VaultError::UnknownAccount(address))
    }

    /// Client sending transactions signed by a held account.
    pub fn signer_client<M: Middleware>(
        &self,
        address: Address,
        client: M,
    ) -> Result<SignerMiddleware<M, LocalWallet>, VaultError> {
        Ok(SignerMiddleware::new(client, self.keyed_signer(address)?))
    }

    /// Sign `tx` with the key of `sender` using EIP-155 replay protection.
    pub fn sign(&self, sender: Address, tx: &TypedTransaction) -> Result<SignedTx, VaultError> {
        let wallet = self.keyed_signer(sender)?;
        sign_with(&wallet, self.chain_id, tx.clone())
    }

    /// Create a new account funded with `amount` by the vault's genesis account.
    ///
    /// Blocks until the funding transaction has a receipt, polling up to
    /// [`VAULT_RECEIPT_ATTEMPTS`] times.
    pub async fn create_and_fund_account<M: Middleware>(
        &self,
        ctx: &Context,
        client: &M,
        amount: U256,
    ) -> Result<Address, VaultError> {
        let address = self.generate_account();
        let tx = self.make_funding_tx(address, amount)?;
        self.broadcast(ctx, client, &tx).await?;

        for _ in 0..VAULT_RECEIPT_ATTEMPTS {
            let receipt = ctx
                .run(client.get_transaction_receipt(tx.hash))
                .await?
                .map_err(|e| VaultError::Receipt(e.to_string()))?;
            if let Some(receipt) = receipt {
                info!(
                    chain_id = self.chain_id,
                    account = ?address,
                    block = ?receipt.block_number,
                    "funded test account"
                );
                return Ok(address);
            }
            tokio::select! {
                _ = tokio::time::sleep(VAULT_RECEIPT_INTERVAL) => {}
                err = ctx.done() => return Err(err.into()),
            }
        }
        Err(VaultError::FundingTimeout(VAULT_RECEIPT_ATTEMPTS))
    }

    /// Broadcast a 1 wei funding transfer to a fresh account without waiting for it.
    pub async fn send_test_tx<M: Middleware>(
        &self,
        ctx: &Context,
        client: &M,
    ) -> Result<SignedTx, VaultError> {
        let address = self.generate_account();
        let tx = self.make_funding_tx(address, U256::one())?;
        self.broadcast(ctx, client, &tx).await?;
        Ok(tx)
    }

    /// Raise the nonce counter to the funding account's pending nonce.
    pub async fn sync_nonce<M: Middleware>(
        &self,
        ctx: &Context,
        client: &M,
    ) -> Result<u64, VaultError> {
        let pending = ctx
            .run(client.get_transaction_count(
                self.funder.address(),
                Some(BlockNumber::Pending.into()),
            ))
            .await?
            .map_err(|e| VaultError::Receipt(e.to_string()))?
            .as_u64();
        let mut state = self.state();
        state.nonce = state.nonce.max(pending);
        Ok(state.nonce)
    }

    // The nonce is reserved before broadcast and never handed back, a failed
    // send leaves a gap in the funding account's nonce sequence.
    async fn broadcast<M: Middleware>(
        &self,
        ctx: &Context,
        client: &M,
        tx: &SignedTx,
    ) -> Result<(), VaultError> {
        ctx.run(client.send_raw_transaction(tx.raw.clone()))
            .await?
            .map_err(|e| VaultError::Send(e.to_string()))?;
        debug!(chain_id = self.chain_id, tx = ?tx.hash, "sent funding transaction");
        Ok(())
    }

    fn make_funding_tx(&self, recipient: Address, amount: U256) -> Result<SignedTx, VaultError> {
        let nonce = self.next_nonce();
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(self.funder.address())
            .to(recipient)
            .value(amount)
            .nonce(nonce)
            .gas(VAULT_FUNDING_GAS_LIMIT)
            .max_priority_fee_per_gas(VAULT_FUNDING_TIP_CAP)
            .max_fee_per_gas(VAULT_FUNDING_FEE_CAP)
            .chain_id(self.chain_id)
            .into();
        sign_with(&self.funder, self.chain_id, tx)
    }

    /// Nonce of the next funding transaction.
    fn next_nonce(&self) -> u64 {
        let mut state = self.state();
        let nonce = state.nonce;
        state.nonce += 1;
        nonce
    }
}

fn sign_with(
    wallet: &LocalWallet,
    chain_id: u64,
    mut tx: TypedTransaction,
) -> Result<SignedTx, VaultError> {
    tx.set_chain_id(chain_id);
    if tx.from().is_none() {
        tx.set_from(wallet.address());
    }
    let signature = wallet
        .sign_transaction_sync(&tx)
        .map_err(|e| VaultError::Sign(e.to_string()))?;
    Ok(SignedTx {
        raw: tx.rlp_signed(&signature),
        hash: tx.hash(&signature),
    })
}
