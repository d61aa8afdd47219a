//! Client type aliases.

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider, Ws};
use ethers::signers::LocalWallet;

/// HTTP JSON-RPC client of an engine node.
pub type HttpClient = Provider<Http>;
/// WebSocket JSON-RPC client of an engine node, needed for subscriptions.
pub type WsClient = Provider<Ws>;
/// HTTP client signing with a local key.
pub type EthRpcClient = SignerMiddleware<Provider<Http>, LocalWallet>;
