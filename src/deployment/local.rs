//! Operator embedded in the test process

use super::operator::{Operator, OperatorError, ReconcilerRegistry};
use super::OperatorDeployment;
use crate::session::HarnessError;
use async_trait::async_trait;
use kube::Client;
use tracing::{info, warn};

/// Runs every registered reconciler in-process
///
/// The operator owns the client it was started with and drops it on stop,
/// so the session has to reconnect afterwards.
pub struct EmbeddedDeployment {
    registry: ReconcilerRegistry,
    operator: Option<Operator>,
}

impl EmbeddedDeployment {
    pub fn new(registry: ReconcilerRegistry) -> Self {
        Self {
            registry,
            operator: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.operator.as_ref().is_some_and(Operator::is_running)
    }
}

#[async_trait]
impl OperatorDeployment for EmbeddedDeployment {
    async fn start(&mut self, client: &Client, namespace: &str) -> Result<(), HarnessError> {
        if self.is_running() {
            return Err(OperatorError::AlreadyRunning.into());
        }

        if self.registry.is_empty() {
            warn!(namespace = %namespace, "No reconcilers registered, operator will not reconcile anything");
        }
        info!(namespace = %namespace, reconcilers = self.registry.len(), "Registering reconcilers for operator");
        let mut operator = Operator::new(client.clone());
        for (name, reconciler) in self.registry.instantiate() {
            info!(reconciler = %name, "Register and apply");
            operator.register(reconciler)?;
        }

        operator.start()?;
        self.operator = Some(operator);
        Ok(())
    }

    async fn stop(&mut self, _client: &Client, _namespace: &str) -> Result<(), HarnessError> {
        if let Some(mut operator) = self.operator.take() {
            operator.stop().await?;
        }
        Ok(())
    }

    fn invalidates_client(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "local"
    }
}
