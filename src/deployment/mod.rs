//! Operator deployment modes
//!
//! The operator under test is either embedded in the test process
//! ([`EmbeddedDeployment`]) or deployed into the cluster from generated
//! manifests ([`RemoteDeployment`]). The session picks one with
//! [`get_deployment`] and only talks to it through [`OperatorDeployment`].

mod local;
mod operator;
mod remote;

pub use local::EmbeddedDeployment;
pub use operator::{Operator, OperatorError, Reconciler, ReconcilerFactory, ReconcilerRegistry};
pub use remote::RemoteDeployment;

use crate::config::{DeploymentMode, HarnessConfig};
use crate::session::HarnessError;
use async_trait::async_trait;
use kube::Client;

/// A way of running the operator for one session
#[async_trait]
pub trait OperatorDeployment: Send + Sync {
    /// Bring the operator online in `namespace`
    async fn start(&mut self, client: &Client, namespace: &str) -> Result<(), HarnessError>;

    /// Take the operator offline again
    async fn stop(&mut self, client: &Client, namespace: &str) -> Result<(), HarnessError>;

    /// Whether the client handed to `start` is unusable after `stop`
    fn invalidates_client(&self) -> bool;

    fn name(&self) -> &str;
}

/// Select the deployment for the configured mode
pub fn get_deployment(config: &HarnessConfig, registry: &ReconcilerRegistry) -> Box<dyn OperatorDeployment> {
    match config.mode {
        DeploymentMode::Local => Box::new(EmbeddedDeployment::new(registry.clone())),
        DeploymentMode::Remote => Box::new(RemoteDeployment::new(config.deployment_manifest())),
    }
}
