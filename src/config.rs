//! Configuration for a test suite
//!
//! Resolved once per suite, either programmatically with the builder methods
//! or from `OPERATOR_TEST_*` environment variables.
//!
//! # Example
//!
//! ```
//! use operator_harness::config::{DeploymentMode, HarnessConfig};
//! use std::time::Duration;
//!
//! let config = HarnessConfig::new()
//!     .mode(DeploymentMode::Remote)
//!     .deployment_target("openshift")
//!     .custom_image("quay.io/keycloak/keycloak:nightly")
//!     .timeout(Duration::from_secs(120));
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEPLOYMENT_MODE_ENV: &str = "OPERATOR_TEST_DEPLOYMENT";
pub const DEPLOYMENT_TARGET_ENV: &str = "OPERATOR_TEST_DEPLOYMENT_TARGET";
pub const KUBERNETES_HOST_ENV: &str = "OPERATOR_TEST_KUBERNETES_HOST";
pub const CUSTOM_IMAGE_ENV: &str = "OPERATOR_TEST_CUSTOM_IMAGE";
pub const BUILD_OUTPUT_ENV: &str = "OPERATOR_TEST_BUILD_OUTPUT";
pub const RESULTS_DIR_ENV: &str = "OPERATOR_TEST_RESULTS_DIR";

pub const DEFAULT_DEPLOYMENT_TARGET: &str = "kubernetes";
pub const DEFAULT_BUILD_OUTPUT: &str = "target/kubernetes";
pub const DEFAULT_RESULTS_DIR: &str = "target/operator-test-results";
pub const DEFAULT_NAMESPACE_PREFIX: &str = "keycloak-test";

/// Errors from resolving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: expected one of {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },
}

/// How the operator under test is brought online
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Reconcilers run in-process against the session client
    #[default]
    Local,
    /// Generated RBAC + Deployment manifests are applied to the cluster
    Remote,
}

impl FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            _ => Err(ConfigError::InvalidValue {
                key: DEPLOYMENT_MODE_ENV.to_string(),
                value: s.to_string(),
                expected: "local, remote".to_string(),
            }),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Suite configuration
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Deployment mode of the operator
    pub mode: DeploymentMode,

    /// Name of the generated deployment manifest, without extension
    pub deployment_target: String,

    /// Overrides the host tests use to reach the cluster
    pub kubernetes_host: Option<String>,

    /// Image to use for managed Keycloak instances
    pub custom_image: Option<String>,

    /// Directory holding generated CRD and deployment manifests
    pub build_output: PathBuf,

    /// Directory receiving diagnostics output
    pub results_dir: PathBuf,

    /// Prefix of generated namespace names
    pub namespace_prefix: String,

    /// Default polling interval for readiness waits
    pub poll_interval: Duration,

    /// Default timeout for readiness waits
    pub timeout: Duration,

    /// Polling interval while waiting for CRDs to be served
    pub crd_poll_interval: Duration,

    /// Block teardown until the session namespace has finished terminating
    pub wait_for_namespace_deletion: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Local,
            deployment_target: DEFAULT_DEPLOYMENT_TARGET.to_string(),
            kubernetes_host: None,
            custom_image: None,
            build_output: PathBuf::from(DEFAULT_BUILD_OUTPUT),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            poll_interval: crate::eventually::DEFAULT_INTERVAL,
            timeout: crate::eventually::DEFAULT_TIMEOUT,
            crd_poll_interval: Duration::from_millis(100),
            wait_for_namespace_deletion: false,
        }
    }
}

impl HarnessConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the config from `OPERATOR_TEST_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the config from an arbitrary key lookup
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(mode) = get(DEPLOYMENT_MODE_ENV) {
            config.mode = mode.parse()?;
        }
        if let Some(target) = get(DEPLOYMENT_TARGET_ENV) {
            config.deployment_target = target;
        }
        config.kubernetes_host = get(KUBERNETES_HOST_ENV);
        config.custom_image = get(CUSTOM_IMAGE_ENV);
        if let Some(dir) = get(BUILD_OUTPUT_ENV) {
            config.build_output = PathBuf::from(dir);
        }
        if let Some(dir) = get(RESULTS_DIR_ENV) {
            config.results_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Set the deployment mode
    pub fn mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the deployment target name
    pub fn deployment_target(mut self, target: impl Into<String>) -> Self {
        self.deployment_target = target.into();
        self
    }

    /// Override the cluster host
    pub fn kubernetes_host(mut self, host: impl Into<String>) -> Self {
        self.kubernetes_host = Some(host.into());
        self
    }

    /// Override the managed Keycloak image
    pub fn custom_image(mut self, image: impl Into<String>) -> Self {
        self.custom_image = Some(image.into());
        self
    }

    /// Set the build output directory
    pub fn build_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_output = dir.into();
        self
    }

    /// Set the results directory
    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    /// Set the namespace prefix
    pub fn namespace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.namespace_prefix = prefix.into();
        self
    }

    /// Set the default poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default wait timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval used while CRDs propagate
    pub fn crd_poll_interval(mut self, interval: Duration) -> Self {
        self.crd_poll_interval = interval;
        self
    }

    /// Wait for the namespace to be gone before teardown returns
    pub fn wait_for_namespace_deletion(mut self, wait: bool) -> Self {
        self.wait_for_namespace_deletion = wait;
        self
    }

    /// Path of the generated operator deployment manifest
    pub fn deployment_manifest(&self) -> PathBuf {
        self.build_output.join(format!("{}.yml", self.deployment_target))
    }

    /// Directory receiving pod log dumps
    pub fn pod_logs_dir(&self) -> PathBuf {
        self.results_dir.join("pod-logs")
    }

    /// Default wait timings for this suite
    pub fn timings(&self) -> Timings {
        Timings {
            interval: self.poll_interval,
            timeout: self.timeout,
        }
    }
}

/// Poll interval and timeout pair used by readiness waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            interval: crate::eventually::DEFAULT_INTERVAL,
            timeout: crate::eventually::DEFAULT_TIMEOUT,
        }
    }
}
