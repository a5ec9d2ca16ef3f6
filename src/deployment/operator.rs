//! Embedded operator runtime
//!
//! Runs a set of reconcilers as tokio tasks sharing one client and one
//! shutdown token.

use async_trait::async_trait;
use kube::Client;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors from the embedded operator
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    #[error("operator is already running")]
    AlreadyRunning,

    #[error("reconciler '{name}' failed: {reason}")]
    ReconcilerFailed { name: String, reason: String },

    #[error("reconciler '{0}' panicked")]
    ReconcilerPanicked(String),
}

/// A control loop run by the operator
///
/// `run` must return once `shutdown` is cancelled.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, client: Client, shutdown: CancellationToken) -> Result<(), OperatorError>;
}

/// Builds a fresh reconciler instance
pub type ReconcilerFactory = Arc<dyn Fn() -> Box<dyn Reconciler> + Send + Sync>;

/// The reconcilers an embedded operator runs, by name
///
/// # Example
///
/// ```ignore
/// let registry = ReconcilerRegistry::new()
///     .with("keycloak", || Box::new(KeycloakReconciler::default()))
///     .with("realm-import", || Box::new(RealmImportReconciler::default()));
/// ```
#[derive(Clone, Default)]
pub struct ReconcilerRegistry {
    factories: BTreeMap<String, ReconcilerFactory>,
}

impl ReconcilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory, replacing any registered under the same name
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Reconciler> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// One new instance of every registered reconciler, in name order
    pub fn instantiate(&self) -> Vec<(String, Box<dyn Reconciler>)> {
        self.factories
            .iter()
            .map(|(name, factory)| (name.clone(), factory()))
            .collect()
    }
}

impl fmt::Debug for ReconcilerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// Reconcilers bound to a client, started and stopped together
pub struct Operator {
    client: Client,
    reconcilers: Vec<Arc<dyn Reconciler>>,
    shutdown: Option<CancellationToken>,
    tasks: Vec<(String, JoinHandle<Result<(), OperatorError>>)>,
}

impl Operator {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reconcilers: Vec::new(),
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    /// Add a reconciler; only allowed before [`start`](Self::start)
    pub fn register(&mut self, reconciler: Box<dyn Reconciler>) -> Result<(), OperatorError> {
        if self.is_running() {
            return Err(OperatorError::AlreadyRunning);
        }
        self.reconcilers.push(Arc::from(reconciler));
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Spawn every registered reconciler
    pub fn start(&mut self) -> Result<(), OperatorError> {
        if self.is_running() {
            return Err(OperatorError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        for reconciler in &self.reconcilers {
            let name = reconciler.name().to_string();
            let reconciler = Arc::clone(reconciler);
            let client = self.client.clone();
            let token = shutdown.clone();

            info!(reconciler = %name, "Starting reconciler");
            let handle = tokio::spawn(async move { reconciler.run(client, token).await });
            self.tasks.push((name, handle));
        }
        self.shutdown = Some(shutdown);
        Ok(())
    }

    /// Cancel every reconciler and wait until all of them have returned
    ///
    /// Returns the first reconciler failure, after all tasks have ended.
    /// Stopping an operator that is not running is a no-op.
    pub async fn stop(&mut self) -> Result<(), OperatorError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };
        shutdown.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain(..) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(OperatorError::ReconcilerPanicked(name.clone())),
                Err(e) => Err(OperatorError::ReconcilerFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                }),
            };
            match result {
                Ok(()) => info!(reconciler = %name, "Reconciler stopped"),
                Err(e) => {
                    warn!(reconciler = %name, error = %e, "Reconciler ended with error");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
