//! In-memory stand-ins for chain RPC and the node launcher.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{JsonRpcClient, MockError, PubsubClient};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::{keccak256, rlp::Rlp};
use rollup_hive::errors::LaunchError;
use rollup_hive::{ExecOutput, NodeLauncher, NodeRole, ServiceEndpoint, ServicePort, StartParams};
use futures_util::Stream;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Default)]
struct ChainState {
    height: u64,
    /// Height added by every `eth_blockNumber` call.
    height_step: u64,
    /// Status given to broadcast transactions, `None` keeps them pending forever.
    auto_land: Option<u64>,
    landed: HashMap<H256, u64>,
    sent_nonces: Vec<u64>,
    failing: HashSet<String>,
    receipt_polls: usize,
    /// Logs returned by `eth_getLogs`.
    past_logs: Vec<Log>,
    next_subscription: u64,
    /// Kind ("newHeads", "logs") requested through `eth_subscribe`, by id.
    subscription_kinds: HashMap<U256, String>,
    subscribers: Vec<(String, mpsc::UnboundedSender<Box<RawValue>>)>,
    /// Every notification emitted, replayed to later subscribers.
    emitted: Vec<(String, Value)>,
    subscriptions_closed: bool,
}

/// JSON-RPC transport answering from in-memory chain state.
#[derive(Clone, Default)]
pub struct FakeChain {
    chain_id: u64,
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Arc::default(),
        }
    }

    pub fn provider(&self) -> Provider<FakeChain> {
        Provider::new(self.clone())
    }

    pub fn with_height(self, height: u64, step: u64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.height = height;
            state.height_step = step;
        }
        self
    }

    /// Broadcast transactions get a receipt with `status` right away.
    pub fn landing_with(self, status: u64) -> Self {
        self.state.lock().unwrap().auto_land = Some(status);
        self
    }

    pub fn failing(self, method: &str) -> Self {
        self.state.lock().unwrap().failing.insert(method.to_string());
        self
    }

    pub fn land(&self, hash: H256, status: u64) {
        self.state.lock().unwrap().landed.insert(hash, status);
    }

    /// Announce a new head to `newHeads` subscribers.
    pub fn emit_head(&self, number: u64) {
        self.emit(
            "newHeads",
            json!(Block::<TxHash> {
                hash: Some(H256::from_low_u64_be(number)),
                number: Some(U64::from(number)),
                ..Default::default()
            }),
        );
    }

    /// Deliver a log to `logs` subscribers.
    pub fn emit_log(&self, log: Log) {
        self.emit("logs", json!(log));
    }

    /// Store a log already on chain, served by `eth_getLogs`.
    pub fn add_past_log(&self, log: Log) {
        self.state.lock().unwrap().past_logs.push(log);
    }

    /// End every live subscription stream, and every later one after its replay.
    pub fn close_subscriptions(&self) {
        let mut state = self.state.lock().unwrap();
        state.subscriptions_closed = true;
        state.subscribers.clear();
    }

    fn emit(&self, kind: &str, notification: Value) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(subscribed, tx)| {
            subscribed != kind || tx.send(to_raw_value(&notification).unwrap()).is_ok()
        });
        state.emitted.push((kind.to_string(), notification));
    }

    pub fn sent_nonces(&self) -> Vec<u64> {
        self.state.lock().unwrap().sent_nonces.clone()
    }

    pub fn receipt_polls(&self) -> usize {
        self.state.lock().unwrap().receipt_polls
    }

    fn answer(&self, method: &str, params: Value) -> Result<Value, MockError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(method) {
            return Err(MockError::EmptyResponses);
        }
        let answer = match method {
            "eth_chainId" => json!(U256::from(self.chain_id)),
            "eth_blockNumber" => {
                state.height += state.height_step;
                json!(U64::from(state.height))
            }
            "eth_getTransactionCount" => json!(U256::from(state.sent_nonces.len())),
            "eth_sendRawTransaction" => {
                let raw: Bytes = serde_json::from_value(params[0].clone())?;
                let (tx, _) = TypedTransaction::decode_signed(&Rlp::new(&raw)).expect("signed tx");
                let hash = H256::from(keccak256(&raw));
                state.sent_nonces.push(tx.nonce().expect("nonce").as_u64());
                if let Some(status) = state.auto_land {
                    state.landed.insert(hash, status);
                }
                json!(hash)
            }
            "eth_getTransactionReceipt" => {
                state.receipt_polls += 1;
                let hash: H256 = serde_json::from_value(params[0].clone())?;
                match state.landed.get(&hash) {
                    Some(status) => json!(TransactionReceipt {
                        transaction_hash: hash,
                        block_number: Some(U64::from(state.height)),
                        status: Some(U64::from(*status)),
                        ..Default::default()
                    }),
                    None => Value::Null,
                }
            }
            "eth_getLogs" => json!(state.past_logs),
            "eth_subscribe" => {
                state.next_subscription += 1;
                let id = U256::from(state.next_subscription);
                let kind = params[0].as_str().unwrap_or_default().to_string();
                state.subscription_kinds.insert(id, kind);
                json!(id)
            }
            "eth_unsubscribe" => json!(true),
            _ => return Err(MockError::EmptyResponses),
        };
        Ok(answer)
    }
}

impl Debug for FakeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeChain").field("chain_id", &self.chain_id).finish()
    }
}

#[async_trait]
impl JsonRpcClient for FakeChain {
    type Error = MockError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        let params = serde_json::to_value(params)?;
        let answer = self.answer(method, params)?;
        Ok(serde_json::from_value(answer)?)
    }
}

impl PubsubClient for FakeChain {
    type NotificationStream = Pin<Box<dyn Stream<Item = Box<RawValue>> + Send>>;

    fn subscribe<T: Into<U256>>(&self, id: T) -> Result<Self::NotificationStream, MockError> {
        let mut state = self.state.lock().unwrap();
        let kind = state
            .subscription_kinds
            .get(&id.into())
            .cloned()
            .unwrap_or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        for (emitted, notification) in &state.emitted {
            if *emitted == kind {
                let _ = tx.send(to_raw_value(notification)?);
            }
        }
        if !state.subscriptions_closed {
            state.subscribers.push((kind, tx));
        }
        Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|notification| (notification, rx))
        })))
    }

    fn unsubscribe<T: Into<U256>>(&self, _id: T) -> Result<(), MockError> {
        Ok(())
    }
}

/// What a [`FakeLauncher`] was asked to do.
#[derive(Debug, Clone)]
pub enum LaunchEvent {
    Start {
        role: NodeRole,
        name: String,
        image: String,
        params: StartParams,
    },
    Exec {
        service: String,
        command: String,
    },
    Teardown,
}

/// Launcher recording its calls and handing out endpoints on `engine_addr`.
pub struct FakeLauncher {
    engine_addr: String,
    exec_exit_code: i32,
    events: Mutex<Vec<LaunchEvent>>,
    counters: Mutex<HashMap<NodeRole, usize>>,
    journal: Option<Journal>,
}

impl FakeLauncher {
    pub fn new(engine_addr: impl Into<String>) -> Self {
        Self {
            engine_addr: engine_addr.into(),
            exec_exit_code: 0,
            events: Mutex::default(),
            counters: Mutex::default(),
            journal: None,
        }
    }

    /// Also note every start as `start <role>` in `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_exec_exit_code(mut self, code: i32) -> Self {
        self.exec_exit_code = code;
        self
    }

    pub fn events(&self) -> Vec<LaunchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn started_roles(&self) -> Vec<NodeRole> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LaunchEvent::Start { role, .. } => Some(role),
                _ => None,
            })
            .collect()
    }

    pub fn start_params(&self, role: NodeRole) -> Vec<StartParams> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                LaunchEvent::Start { role: r, params, .. } if r == role => Some(params),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl NodeLauncher for FakeLauncher {
    async fn start(
        &self,
        role: NodeRole,
        image: &str,
        params: &StartParams,
    ) -> Result<ServiceEndpoint, LaunchError> {
        let name = {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters.entry(role).or_insert(0);
            let name = format!("{}-{}", role.as_str(), counter);
            *counter += 1;
            name
        };
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("start {role}"));
        }
        self.events.lock().unwrap().push(LaunchEvent::Start {
            role,
            name: name.clone(),
            image: image.to_string(),
            params: params.clone(),
        });
        let ports = role
            .port_specs()
            .iter()
            .map(|(port, number)| ServicePort {
                name: port.to_string(),
                private_port: *number,
                public_addr: self.engine_addr.clone(),
            })
            .collect();
        Ok(ServiceEndpoint {
            name,
            uuid: "0123456789ab".to_string(),
            ports,
        })
    }

    async fn exec(
        &self,
        endpoint: &ServiceEndpoint,
        command: &str,
    ) -> Result<ExecOutput, LaunchError> {
        self.events.lock().unwrap().push(LaunchEvent::Exec {
            service: endpoint.name.clone(),
            command: command.to_string(),
        });
        Ok(ExecOutput {
            exit_code: self.exec_exit_code,
            output: String::new(),
        })
    }

    async fn teardown(&self) -> Result<(), LaunchError> {
        self.events.lock().unwrap().push(LaunchEvent::Teardown);
        Ok(())
    }
}

/// Answer of an [`RpcServer`] handler: a JSON-RPC `result` or a JSON-RPC `error` object.
pub type Reply = Result<Value, Value>;

type Handler = Arc<dyn Fn(&str, &Value) -> Option<Reply> + Send + Sync>;

/// Ordered record of RPC methods served, shared with a [`FakeLauncher`] through
/// [`FakeLauncher::with_journal`] to check cross-component ordering.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Minimal HTTP JSON-RPC endpoint. Methods the handler returns `None` for get an error.
pub struct RpcServer {
    pub addr: SocketAddr,
    /// Every method served, in arrival order.
    pub journal: Journal,
    /// `authorization` header of every request that carried one.
    pub auth_headers: Arc<Mutex<Vec<String>>>,
}

impl RpcServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + Sync + 'static,
    {
        Self::start_with_errors(move |method, params| handler(method, params).map(Ok)).await
    }

    pub async fn start_with_errors<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(handler);
        let journal = Journal::default();
        let auth_headers: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen = (journal.clone(), auth_headers.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_connection(
                    socket,
                    handler.clone(),
                    seen.0.clone(),
                    seen.1.clone(),
                ));
            }
        });
        Self {
            addr,
            journal,
            auth_headers,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn served(&self, method: &str) -> usize {
        self.journal.lock().unwrap().iter().filter(|m| *m == method).count()
    }

    /// Engine that only answers `eth_chainId` and `eth_blockNumber`.
    pub async fn engine(chain_id: u64) -> Self {
        Self::start(move |method, _| match method {
            "eth_chainId" => Some(json!(U256::from(chain_id))),
            "eth_blockNumber" => Some(json!(U64::from(1))),
            _ => None,
        })
        .await
    }

    /// Engine that also fills, accepts and confirms transactions. Every receipt it
    /// hands out has status 1.
    pub async fn chain(chain_id: u64) -> Self {
        Self::start_with_errors(move |method, params| {
            chain_reply(chain_id, method, params).map(Ok)
        })
        .await
    }
}

/// Answers of a chain that accepts every transaction, shared by the stub handlers.
pub fn chain_reply(chain_id: u64, method: &str, params: &Value) -> Option<Value> {
    let gwei = U256::exp10(9);
    let answer = match method {
        "eth_chainId" => json!(U256::from(chain_id)),
        "eth_blockNumber" => json!(U64::from(1)),
        "eth_getTransactionCount" => json!(U256::zero()),
        "eth_getBlockByNumber" => json!(Block::<TxHash> {
            hash: Some(H256::repeat_byte(0x01)),
            number: Some(U64::one()),
            base_fee_per_gas: Some(gwei),
            gas_limit: U256::from(30_000_000u64),
            ..Default::default()
        }),
        "eth_feeHistory" => json!({
            "oldestBlock": U256::one(),
            "baseFeePerGas": [gwei, gwei],
            "gasUsedRatio": [0.5],
            "reward": [[gwei]],
        }),
        "eth_maxPriorityFeePerGas" | "eth_gasPrice" => json!(gwei),
        "eth_estimateGas" => json!(U256::from(100_000u64)),
        "eth_sendRawTransaction" => {
            let raw: Bytes = serde_json::from_value(params[0].clone()).ok()?;
            json!(H256::from(keccak256(&raw)))
        }
        "eth_getTransactionReceipt" => {
            let hash: H256 = serde_json::from_value(params[0].clone()).ok()?;
            json!(TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(U64::one()),
                status: Some(U64::one()),
                ..Default::default()
            })
        }
        _ => return None,
    };
    Some(answer)
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Handler,
    journal: Journal,
    auth_headers: Arc<Mutex<Vec<String>>>,
) {
    let mut buf = Vec::new();
    loop {
        let header_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if !read_more(&mut socket, &mut buf).await {
                return;
            }
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let header = |name: &str| {
            headers.lines().find_map(|line| {
                let (key, value) = line.split_once(':')?;
                key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
            })
        };
        let len = header("content-length")
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        if let Some(auth) = header("authorization") {
            auth_headers.lock().unwrap().push(auth);
        }
        while buf.len() < header_end + len {
            if !read_more(&mut socket, &mut buf).await {
                return;
            }
        }
        let request: Value =
            serde_json::from_slice(&buf[header_end..header_end + len]).unwrap_or(Value::Null);
        buf.drain(..header_end + len);

        let id = request["id"].clone();
        let method = request["method"].as_str().unwrap_or_default();
        journal.lock().unwrap().push(method.to_string());
        let body = match handler(method, &request["params"]) {
            Some(Ok(result)) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Some(Err(error)) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("{method} not supported") },
            }),
        }
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn read_more(socket: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    match socket.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

/// Log lines written by the harness while the returned guard is alive on this thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn start() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
