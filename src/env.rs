//! Per-test environment handed to every test body.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Config;
use crate::context::Context;
use crate::devnet::Devnet;
use crate::vault::Vault;

/// Environment of a single test: root context, configuration and the shared devnet.
pub struct TestEnv {
    pub context: Context,
    pub conf: Arc<Config>,
    pub net: Arc<Devnet>,
    // most recent context handed out by `timeout_ctx`, canceled on the next call
    last_ctx: Mutex<Option<Context>>,
}

impl TestEnv {
    pub fn new(context: Context, net: Arc<Devnet>) -> Self {
        Self {
            context,
            conf: net.conf().clone(),
            net,
            last_ctx: Mutex::new(None),
        }
    }

    /// Fresh context bounded by the configured RPC timeout.
    ///
    /// Cancels the context returned by the previous call.
    pub fn ctx(&self) -> Context {
        self.timeout_ctx(self.conf.rpc_timeout())
    }

    /// Fresh context bounded by `timeout`, canceling the previously issued one.
    pub fn timeout_ctx(&self, timeout: Duration) -> Context {
        let mut last = self.last_ctx.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = last.take() {
            previous.cancel();
        }
        let ctx = self.context.with_timeout(timeout);
        *last = Some(ctx.clone());
        ctx
    }

    pub fn l1_vault(&self) -> &Vault {
        self.net.l1_vault()
    }

    pub fn l2_vault(&self) -> &Vault {
        self.net.l2_vault()
    }

    /// Cancel the last issued context, if any.
    pub fn release(&self) {
        if let Some(last) = self.last_ctx.lock().unwrap_or_else(|p| p.into_inner()).take() {
            last.cancel();
        }
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.release();
    }
}
