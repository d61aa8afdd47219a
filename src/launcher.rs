//! Seam between the devnet and whatever spawns node containers.

use async_trait::async_trait;

use crate::errors::LaunchError;
use crate::node::{NodeRole, ServiceEndpoint, StartParams};

/// Output of a command executed inside a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns node processes and reports their network endpoints.
#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Start a container of `image` for `role`, configured through `params`.
    async fn start(
        &self,
        role: NodeRole,
        image: &str,
        params: &StartParams,
    ) -> Result<ServiceEndpoint, LaunchError>;

    /// Run `command` inside a started container.
    async fn exec(
        &self,
        endpoint: &ServiceEndpoint,
        command: &str,
    ) -> Result<ExecOutput, LaunchError>;

    /// Tear down every container this launcher started.
    async fn teardown(&self) -> Result<(), LaunchError>;
}
