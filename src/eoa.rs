//! Test externally owned accounts (EOAs) handed out by a [`crate::vault::Vault`].

use ethers::{prelude::*, utils::hex};

/// Key pair of a test account.
#[derive(Clone)]
pub struct Account {
    /// Derived address (public key)
    address: Address,
    /// Signing key
    wallet: LocalWallet,
}

impl Account {
    /// Create new account with randomly generated private key.
    pub fn generate() -> Account {
        Self::from_wallet(LocalWallet::new(&mut rand::thread_rng()))
    }

    /// Admit an externally supplied key, e.g. a genesis-funded account.
    pub fn from_wallet(wallet: LocalWallet) -> Account {
        Account {
            address: wallet.address(),
            wallet,
        }
    }

    /// Get address of account.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Get signing key of account, not bound to any chain id.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// Get hex encoded private key of account.
    pub fn private_key(&self) -> String {
        hex::encode(self.wallet.signer().to_bytes())
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
