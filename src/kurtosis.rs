//! Node launcher backed by a local Kurtosis engine.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kurtosis_sdk::engine_api::engine_service_client::EngineServiceClient;
use serde_json::json;
use tokio::process::Command;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::constants;
use crate::errors::LaunchError;
use crate::launcher::{ExecOutput, NodeLauncher};
use crate::node::{NodeRole, ServiceEndpoint, ServicePort, StartParams};
use crate::utils;

/// Enclave service port info structure.
#[derive(Debug, Clone)]
pub struct EnclaveServicePort {
    /// Port name e.g. "http", "metrics", "rpc", etc
    pub name: String,
    /// Port protocol description e.g. "8080/tcp"
    pub protocol: String,
    /// URL to connect to service e.g. "127.0.0.1:56766".
    pub url: String,
}

impl EnclaveServicePort {
    /// Private port number parsed from the protocol description.
    pub fn private_port(&self) -> Option<u16> {
        self.protocol.split('/').next()?.parse().ok()
    }
}

/// Enclave service structure.
#[derive(Debug)]
pub struct EnclaveService {
    /// Unique identifier for service
    pub uuid: String,
    /// Human readable name of service
    pub name: String,
    /// Status of the service e.g. "RUNNING"
    pub status: String,
    /// List of service ports
    pub ports: Vec<EnclaveServicePort>,
}

impl EnclaveService {
    /// Convert into the launcher-neutral endpoint, skipping ports without a private number.
    pub fn to_endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint {
            name: self.name.clone(),
            uuid: self.uuid.clone(),
            ports: self
                .ports
                .iter()
                .filter_map(|port| {
                    Some(ServicePort {
                        name: port.name.clone(),
                        private_port: port.private_port()?,
                        public_addr: port.url.clone(),
                    })
                })
                .collect(),
        }
    }
}

/// Starlark script adding one service to the enclave, parameterized through JSON args.
const ADD_SERVICE_SCRIPT: &str = r#"
def run(plan, args):
    ports = {}
    for name, number in args["ports"].items():
        ports[name] = PortSpec(number = number, transport_protocol = "TCP")
    plan.add_service(
        name = args["name"],
        config = ServiceConfig(
            image = args["image"],
            ports = ports,
            env_vars = args["env"],
        ),
    )
"#;

/// Launches devnet nodes as services of a single Kurtosis enclave.
pub struct KurtosisLauncher {
    enclave: String,
    counters: Mutex<HashMap<NodeRole, usize>>,
}

impl KurtosisLauncher {
    /// Make sure the CLI, engine and enclave `enclave` exist, creating what is missing.
    pub async fn connect(enclave: &str) -> Result<Self, LaunchError> {
        is_cli_installed().await?;

        // start kurtosis engine (in docker), if no engine context is found
        if !is_engine_running().await? {
            info!("Starting kurtosis engine locally...");
            start_engine().await?;
        }

        let mut engine = connect_engine().await?;
        let existing_enclaves = engine
            .get_enclaves(())
            .await
            .map_err(|e| LaunchError::EngineConnect(e.to_string()))?
            .into_inner();
        let exists = existing_enclaves
            .enclave_info
            .values()
            .any(|info| info.name == enclave);

        if exists {
            info!(enclave, "Reusing existing enclave");
        } else {
            info!(enclave, "No enclave found, creating one");
            add_enclave(enclave).await?;
        }

        Ok(Self {
            enclave: enclave.to_string(),
            counters: Mutex::new(HashMap::new()),
        })
    }

    pub fn enclave(&self) -> &str {
        &self.enclave
    }

    fn next_service_name(&self, role: NodeRole) -> String {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        let counter = counters.entry(role).or_insert(0);
        let name = format!("{}-{}", role.as_str(), counter);
        *counter += 1;
        name
    }
}

#[async_trait]
impl NodeLauncher for KurtosisLauncher {
    async fn start(
        &self,
        role: NodeRole,
        image: &str,
        params: &StartParams,
    ) -> Result<ServiceEndpoint, LaunchError> {
        let name = self.next_service_name(role);
        let ports: serde_json::Map<String, serde_json::Value> = role
            .port_specs()
            .iter()
            .map(|(port, number)| (port.to_string(), json!(number)))
            .collect();
        let env: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(key, value)| (key.clone(), json!(value)))
            .collect();
        let args = json!({ "name": name, "image": image, "ports": ports, "env": env });

        let script_path = std::env::temp_dir().join(format!("{}-{}.star", self.enclave, name));
        tokio::fs::write(&script_path, ADD_SERVICE_SCRIPT)
            .await
            .map_err(|e| LaunchError::FailedToAddService(name.clone(), e.to_string()))?;

        debug!(service = %name, %role, image, "adding service");
        let out = Command::new("kurtosis")
            .arg("run")
            .arg("--enclave")
            .arg(&self.enclave)
            .arg(&script_path)
            .arg(args.to_string())
            .output()
            .await
            .map_err(|e| LaunchError::FailedToAddService(name.clone(), e.to_string()))?;
        let _ = tokio::fs::remove_file(&script_path).await;
        if !out.status.success() {
            return Err(LaunchError::FailedToAddService(
                name,
                String::from_utf8_lossy(&out.stderr).to_string(),
            ));
        }

        let services = get_running_services(&self.enclave).await?;
        let service = services
            .iter()
            .find(|service| service.name == name)
            .ok_or_else(|| LaunchError::ServiceNotFound(name.clone()))?;
        info!(service = %name, %role, status = %service.status, "service started");
        Ok(service.to_endpoint())
    }

    async fn exec(
        &self,
        endpoint: &ServiceEndpoint,
        command: &str,
    ) -> Result<ExecOutput, LaunchError> {
        let out = Command::new("kurtosis")
            .arg("service")
            .arg("exec")
            .arg(&self.enclave)
            .arg(&endpoint.name)
            .arg(command)
            .output()
            .await
            .map_err(|e| LaunchError::FailedToExec(endpoint.name.clone(), e.to_string()))?;
        Ok(ExecOutput {
            exit_code: out.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&out.stdout).to_string(),
        })
    }

    async fn teardown(&self) -> Result<(), LaunchError> {
        info!(enclave = %self.enclave, "Destroying enclave");
        delete_enclave(&self.enclave).await
    }
}

/// Connect to the local Kurtosis engine gRPC API.
pub async fn connect_engine() -> Result<EngineServiceClient<Channel>, LaunchError> {
    EngineServiceClient::connect(constants::DEFAULT_KURTOSIS_ENGINE_ENDPOINT)
        .await
        .map_err(|e| LaunchError::EngineConnect(e.to_string()))
}

/// Start Kurtosis engine locally in docker.
///
/// Command:
/// `kurtosis engine start`
pub async fn start_engine() -> Result<(), LaunchError> {
    let cmd_result = Command::new("kurtosis")
        .arg("engine")
        .arg("start")
        .output()
        .await;
    match cmd_result {
        Ok(out) if out.status.success() => Ok(()),
        _ => Err(LaunchError::FailedToStartEngine),
    }
}

/// Check if Kurtosis CLI is installed locally.
///
/// Command:
/// `kurtosis version`
///
/// If getting version fails, we know Kurtosis is not installed, else it is.
pub async fn is_cli_installed() -> Result<(), LaunchError> {
    let cmd_result = Command::new("kurtosis").arg("version").output().await;
    match cmd_result {
        Ok(out) => {
            if !out.status.success() {
                return Err(LaunchError::FailedToCheckEngineStatus);
            }
            Ok(())
        }
        Err(_) => Err(LaunchError::CliNotInstalled),
    }
}

/// Check if Kurtosis engine is running locally in docker.
///
/// Command:
/// `kurtosis engine status`
///
/// Check if kurtosis engine is running by checking for presence of string:
///
/// `"Kurtosis engine is running with the following info"`
pub async fn is_engine_running() -> Result<bool, LaunchError> {
    let out = Command::new("kurtosis")
        .arg("engine")
        .arg("status")
        .output()
        .await
        .map_err(|_| LaunchError::FailedToCheckEngineStatus)?;
    if !out.status.success() {
        return Err(LaunchError::FailedToCheckEngineStatus);
    }
    let command_stdout = String::from_utf8_lossy(&out.stdout);
    Ok(command_stdout.contains("Kurtosis engine is running with the following info"))
}

/// Create an empty enclave.
///
/// Command:
/// `kurtosis enclave add --name {enclave}`
pub async fn add_enclave(enclave: &str) -> Result<(), LaunchError> {
    let out = Command::new("kurtosis")
        .arg("enclave")
        .arg("add")
        .arg("--name")
        .arg(enclave)
        .output()
        .await
        .map_err(|e| LaunchError::FailedToAddEnclave(e.to_string()))?;
    if !out.status.success() {
        return Err(LaunchError::FailedToAddEnclave(
            String::from_utf8_lossy(&out.stderr).to_string(),
        ));
    }
    Ok(())
}

/// Fetch all active/running services in enclave.
///
/// Command:
/// `kurtosis enclave inspect {enclave}`
pub async fn get_running_services(enclave: &str) -> Result<Vec<EnclaveService>, LaunchError> {
    let out = Command::new("kurtosis")
        .arg("enclave")
        .arg("inspect")
        .arg(enclave)
        .output()
        .await
        .map_err(|e| LaunchError::FailedToGetEnclaveServices(e.to_string()))?;
    if !out.status.success() {
        return Err(LaunchError::FailedToGetEnclaveServices(
            String::from_utf8_lossy(&out.stderr).to_string(),
        ));
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    let services = utils::parse_services_from_enclave_inspect(&stdout);
    utils::pprint_services(&services);
    Ok(services)
}

/// Deletes an enclave.
///
/// Command:
/// `kurtosis enclave rm {enclave} --force`
///
/// We force removal using `--force` to prevent having to stop enclave, then removing.
pub async fn delete_enclave(enclave: &str) -> Result<(), LaunchError> {
    let out = Command::new("kurtosis")
        .arg("enclave")
        .arg("rm")
        .arg(enclave)
        .arg("--force")
        .output()
        .await
        .map_err(|e| LaunchError::FailedToDestroyEnclave(e.to_string()))?;
    if !out.status.success() {
        return Err(LaunchError::FailedToDestroyEnclave(
            String::from_utf8_lossy(&out.stderr).to_string(),
        ));
    }
    Ok(())
}
