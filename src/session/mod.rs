//! Cluster session management
//!
//! A [`ClusterSessionManager`] owns everything one suite shares: the cluster
//! client, the namespace, the operator under test and the dependent database.
//! It walks a fixed state machine:
//!
//! ```text
//! Uninitialized -> ClusterConnected -> CrdsInstalled -> NamespaceReady
//!   -> ControllerActive -> DependentServiceReady -> Running
//!   -> TearingDown -> Closed
//! ```
//!
//! # Errors
//!
//! All fallible operations return [`HarnessError`]. Kubernetes API errors are
//! rewritten into readable messages naming the resource involved.

#![allow(clippy::missing_errors_doc)]

mod cleanup;
mod lifecycle;

use crate::cluster::{self, ClusterConnector, KubeConnector};
use crate::config::{ConfigError, DeploymentMode, HarnessConfig};
use crate::deployment::{self, OperatorDeployment, OperatorError, ReconcilerRegistry};
use crate::eventually::ConditionError;
use crate::namespace;
use crate::runner::SuiteReport;
use crate::{crd, dependent};
use kube::Client;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Errors from session operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("Failed to install CRDs: {0}")]
    CrdError(String),

    #[error("Failed to create namespace: {0}")]
    NamespaceError(String),

    #[error("Failed to cleanup: {0}")]
    CleanupError(String),

    #[error("Failed to apply resource: {0}")]
    ApplyError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("Failed to delete resource: {0}")]
    DeleteError(String),

    #[error("Failed to list resources: {0}")]
    ListError(String),

    #[error("Failed to get logs: {0}")]
    LogsError(String),

    #[error("Invalid manifest {path}: {reason}")]
    ManifestError { path: String, reason: String },

    #[error("Operator error: {0}")]
    OperatorError(#[from] OperatorError),

    #[error("{0}")]
    Wait(#[from] ConditionError),

    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Tests ran to completion but the session could not be torn down
    #[error("Teardown failed after {report}: {source}")]
    TeardownFailed {
        report: SuiteReport,
        source: Box<HarnessError>,
    },
}

/// Improve a kube error message with human-readable context
///
/// Parses common Kubernetes error patterns and returns a more
/// understandable message naming the resource.
pub(crate) fn improve_error_message(err: &kube::Error, kind: &str, name: &str) -> String {
    let raw = err.to_string();

    if is_not_found(err) {
        return format!("{kind} '{name}' not found");
    }

    match err {
        kube::Error::Api(response) if response.code == 409 => {
            return format!("{kind} '{name}' already exists");
        }
        kube::Error::Api(response) if response.code == 403 => {
            return format!("{kind} '{name}': permission denied (check RBAC)");
        }
        _ => {}
    }

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{kind} '{name}': cannot connect to Kubernetes API");
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{kind} '{name}': operation timed out");
    }

    format!("{kind} '{name}': {raw}")
}

/// Whether the API server answered 404
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Uninitialized,
    ClusterConnected,
    CrdsInstalled,
    NamespaceReady,
    ControllerActive,
    DependentServiceReady,
    Running,
    TearingDown,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::ClusterConnected => "cluster-connected",
            Self::CrdsInstalled => "crds-installed",
            Self::NamespaceReady => "namespace-ready",
            Self::ControllerActive => "controller-active",
            Self::DependentServiceReady => "dependent-service-ready",
            Self::Running => "running",
            Self::TearingDown => "tearing-down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Per-suite shared state
pub struct TestSession {
    /// Namespace every test of the suite runs in
    pub namespace: String,
    pub mode: DeploymentMode,
    /// Client defaulting to `namespace` once it exists
    pub client: Client,
    pub custom_image: Option<String>,
    /// Host tests use to reach services exposed by the cluster
    pub kubernetes_host: String,
    pub is_openshift: bool,
    controller: Option<Box<dyn OperatorDeployment>>,
}

impl fmt::Debug for TestSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSession")
            .field("namespace", &self.namespace)
            .field("mode", &self.mode)
            .field("custom_image", &self.custom_image)
            .field("kubernetes_host", &self.kubernetes_host)
            .field("is_openshift", &self.is_openshift)
            .field(
                "controller",
                &self.controller.as_ref().map(|c| c.name().to_string()),
            )
            .finish_non_exhaustive()
    }
}

/// Drives one suite through setup, per-test cleanup and teardown
///
/// # Example
///
/// ```ignore
/// let mut session = ClusterSessionManager::new(HarnessConfig::from_env()?, registry);
/// session.setup().await?;
/// // ... run tests against session.session() ...
/// session.cleanup().await?;
/// session.teardown().await?;
/// ```
pub struct ClusterSessionManager {
    config: HarnessConfig,
    connector: Arc<dyn ClusterConnector>,
    registry: ReconcilerRegistry,
    state: SessionState,
    session: Option<TestSession>,
}

impl ClusterSessionManager {
    /// Create a manager connecting through the inferred kubeconfig
    pub fn new(config: HarnessConfig, registry: ReconcilerRegistry) -> Self {
        Self::with_connector(config, registry, Arc::new(KubeConnector))
    }

    /// Create a manager with a custom cluster connector
    pub fn with_connector(
        config: HarnessConfig,
        registry: ReconcilerRegistry,
        connector: Arc<dyn ClusterConnector>,
    ) -> Self {
        Self {
            config,
            connector,
            registry,
            state: SessionState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The live session, once setup has connected to the cluster
    pub fn session(&self) -> Option<&TestSession> {
        self.session.as_ref()
    }

    fn running_session(&self) -> Result<&TestSession, HarnessError> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Running) => Ok(session),
            _ => Err(HarnessError::InvalidState {
                expected: SessionState::Running.to_string(),
                actual: self.state.to_string(),
            }),
        }
    }

    fn session_mut(&mut self) -> Result<&mut TestSession, HarnessError> {
        let state = self.state;
        self.session.as_mut().ok_or_else(|| HarnessError::InvalidState {
            expected: "connected session".to_string(),
            actual: state.to_string(),
        })
    }

    /// Bring the suite environment up
    ///
    /// Steps run in order and the first failure aborts setup. The state
    /// reached is kept so that [`teardown`](Self::teardown) undoes only what
    /// was created.
    pub async fn setup(&mut self) -> Result<(), HarnessError> {
        if self.state != SessionState::Uninitialized {
            return Err(HarnessError::InvalidState {
                expected: SessionState::Uninitialized.to_string(),
                actual: self.state.to_string(),
            });
        }

        let namespace = namespace::new_namespace_name(&self.config.namespace_prefix);
        info!(
            namespace = %namespace,
            mode = %self.config.mode,
            "Setting up test session"
        );

        let client = self.connector.connect(None).await?;
        self.session = Some(TestSession {
            namespace: namespace.clone(),
            mode: self.config.mode,
            client: client.clone(),
            custom_image: self.config.custom_image.clone(),
            kubernetes_host: cluster::DEFAULT_HOST.to_string(),
            is_openshift: false,
            controller: None,
        });
        self.state = SessionState::ClusterConnected;

        info!("Creating CRDs");
        crd::install_crds(&client, &self.config).await?;
        self.state = SessionState::CrdsInstalled;

        info!(namespace = %namespace, "Creating namespace");
        namespace::create_namespace(&client, &namespace, &self.config.namespace_prefix).await?;
        self.state = SessionState::NamespaceReady;

        let client = self.connector.connect(Some(&namespace)).await?;
        let host = cluster::resolve_host(
            self.config.kubernetes_host.as_deref(),
            self.connector.cluster_host().await.as_deref(),
        );
        let is_openshift = cluster::is_openshift(&client).await;
        {
            let session = self.session_mut()?;
            session.client = client.clone();
            session.kubernetes_host = host;
            session.is_openshift = is_openshift;
        }

        let mut controller = deployment::get_deployment(&self.config, &self.registry);
        info!(deployment = controller.name(), "Starting operator");
        let started = controller.start(&client, &namespace).await;
        // Keep the handle even on failure so teardown can stop what did start
        self.session_mut()?.controller = Some(controller);
        started?;
        self.state = SessionState::ControllerActive;

        dependent::deploy(&client, &namespace, self.config.timings()).await?;
        self.state = SessionState::DependentServiceReady;

        self.state = SessionState::Running;
        info!(namespace = %namespace, "Test session ready");
        Ok(())
    }

    /// Tear the suite environment down
    ///
    /// Accepted from any state reached by setup. Stops the operator,
    /// reconnects when the stopped operator invalidated the client, deletes
    /// the namespace (optionally waiting until it is gone) and drops the
    /// client. Later steps run even when earlier
    /// ones fail; the first error is returned. Calling it again once closed is
    /// a no-op.
    pub async fn teardown(&mut self) -> Result<(), HarnessError> {
        let reached = self.state;
        if matches!(reached, SessionState::Closed | SessionState::TearingDown) {
            return Ok(());
        }
        self.state = SessionState::TearingDown;

        let Some(mut session) = self.session.take() else {
            self.state = SessionState::Closed;
            return Ok(());
        };
        let mut first_error: Option<HarnessError> = None;

        if let Some(mut controller) = session.controller.take() {
            info!(deployment = controller.name(), "Stopping operator");
            if let Err(e) = controller.stop(&session.client, &session.namespace).await {
                warn!(error = %e, "Failed to stop operator");
                first_error.get_or_insert(e);
            }

            if controller.invalidates_client() {
                info!("Creating new Kubernetes client");
                match self.connector.connect(Some(&session.namespace)).await {
                    Ok(client) => session.client = client,
                    Err(e) => {
                        warn!(error = %e, "Failed to recreate client, reusing the old one");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if reached >= SessionState::NamespaceReady {
            info!(namespace = %session.namespace, "Deleting namespace");
            match namespace::delete_namespace(&session.client, &session.namespace).await {
                Ok(()) if self.config.wait_for_namespace_deletion => {
                    if let Err(e) = namespace::wait_namespace_deleted(
                        &session.client,
                        &session.namespace,
                        self.config.timings(),
                    )
                    .await
                    {
                        warn!(namespace = %session.namespace, error = %e, "Namespace still terminating");
                        first_error.get_or_insert(e);
                    }
                }
                Ok(()) => {}
                Err(e) => {
                    warn!(namespace = %session.namespace, error = %e, "Namespace delete rejected");
                    first_error.get_or_insert(e);
                }
            }
        }

        drop(session);
        self.state = SessionState::Closed;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
