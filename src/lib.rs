//! Integration test harness for an L1/L2 rollup devnet.
//!
//! A [`Devnet`] starts and wires engines, drivers, proposers and provers through a
//! [`NodeLauncher`]. Test bodies observe the network with the blocking primitives in
//! [`wait`], fund accounts through a [`Vault`] and are scheduled by [`run_tests`].

pub mod assertions;
pub mod config;
pub mod constants;
pub mod context;
pub mod devnet;
pub mod env;
pub mod eoa;
pub mod errors;
pub mod kurtosis;
pub mod launcher;
pub mod logging;
pub mod node;
pub mod rollup;
pub mod runner;
pub mod scenarios;
pub mod types;
pub mod vault;
pub mod wait;
mod utils;

pub use config::Config;
pub use context::Context;
pub use devnet::Devnet;
pub use env::TestEnv;
pub use errors::Error;
pub use launcher::{ExecOutput, NodeLauncher};
pub use node::{EngineNode, NodeRole, ServiceEndpoint, ServicePort, StartParams};
pub use runner::{run_tests, RunReport, RunTestsParams, TestOutcome, TestSpec};
pub use vault::Vault;
