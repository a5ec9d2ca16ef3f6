//! Operator Harness - suite lifecycle for Kubernetes operator integration tests
//!
//! Brings a cluster into a known state for a suite of operator tests and
//! takes it down again: installs the operator's CRDs, isolates the suite in a
//! fresh namespace, runs the operator (embedded or deployed from manifests),
//! deploys the database it depends on, cleans managed resources up after every
//! test and collects diagnostics when a test fails.
//!
//! # Example
//!
//! ```no_run
//! use operator_harness::{
//!     BoxError, ClusterSessionManager, HarnessConfig, ReconcilerRegistry, Suite, TestContext,
//! };
//! use kube::api::PostParams;
//!
//! async fn creates_keycloak(ctx: TestContext) -> Result<(), BoxError> {
//!     let kc = ctx.test_keycloak(true)?;
//!     ctx.keycloaks().create(&PostParams::default(), &kc).await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     operator_harness::telemetry::init_logging();
//!
//!     let manager = ClusterSessionManager::new(HarnessConfig::from_env()?, ReconcilerRegistry::new());
//!     let report = Suite::new("KeycloakDeploymentTest", manager)
//!         .test("creates_keycloak", creates_keycloak)
//!         .run()
//!         .await?;
//!
//!     println!("{report}");
//!     Ok(())
//! }
//! ```
//!
//! # Test attribute
//!
//! ```ignore
//! #[operator_harness::test]
//! async fn creates_keycloak(ctx: TestContext) -> Result<(), kube::Error> {
//!     let kc = ctx.test_keycloak(true).unwrap();
//!     ctx.keycloaks().create(&Default::default(), &kc).await?;
//!     Ok(())
//! }
//! ```

pub mod cluster;
pub mod config;
pub mod context;
pub mod crd;
pub mod dependent;
pub mod deployment;
pub mod diagnostics;
pub mod eventually;
pub mod manifest;
pub mod namespace;
pub mod runner;
pub mod session;
pub mod telemetry;
pub mod wait;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cluster::{ClusterConnector, KubeConnector};
pub use config::{ConfigError, DeploymentMode, HarnessConfig, Timings};
pub use context::TestContext;
pub use crd::{Keycloak, KeycloakRealmImport, KeycloakSpec};
pub use deployment::{
    get_deployment, OperatorDeployment, OperatorError, Reconciler, ReconcilerRegistry,
};
pub use diagnostics::{DiagnosticRecord, DiagnosticsReport};
pub use eventually::{eventually, Check, ConditionError};
pub use namespace::{namespace_name_from, new_namespace_name};
pub use runner::{abort, Aborted, BoxError, Lifecycle, Suite, SuiteReport, TestInfo, TestOutcome};
pub use session::{ClusterSessionManager, HarnessError, SessionState, TestSession};
pub use wait::WaitError;

// Re-export the test macro
pub use operator_harness_macros::test;
