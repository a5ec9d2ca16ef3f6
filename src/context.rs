//! Per-test fixture
//!
//! A [`TestContext`] is handed to every test body. It carries the session's
//! client and namespace plus the settings tests need to build resources.
//!
//! # Example
//!
//! ```ignore
//! async fn creates_statefulset(ctx: TestContext) -> Result<(), BoxError> {
//!     let kc = ctx.test_keycloak(true)?;
//!     ctx.keycloaks()
//!         .create(&PostParams::default(), &kc)
//!         .await?;
//!     Ok(())
//! }
//! ```

use crate::config::{DeploymentMode, Timings};
use crate::crd::{self, Keycloak, KeycloakRealmImport};
use crate::session::{HarnessError, TestSession};
use kube::api::Api;
use kube::Client;

/// Everything a test body needs from the session
#[derive(Clone)]
pub struct TestContext {
    pub client: Client,
    pub namespace: String,
    pub mode: DeploymentMode,
    pub custom_image: Option<String>,
    /// Host on which services exposed by the cluster are reachable
    pub kubernetes_host: String,
    pub is_openshift: bool,
    /// Wait timings configured for the suite
    pub timings: Timings,
}

impl TestContext {
    pub(crate) fn from_session(session: &TestSession, timings: Timings) -> Self {
        Self {
            client: session.client.clone(),
            namespace: session.namespace.clone(),
            mode: session.mode,
            custom_image: session.custom_image.clone(),
            kubernetes_host: session.kubernetes_host.clone(),
            is_openshift: session.is_openshift,
            timings,
        }
    }

    /// The default Keycloak, adjusted for this session
    ///
    /// Bound to the test namespace, using the custom image when one is
    /// configured. With `disable_probes` every probe of the server container
    /// is replaced by one that always succeeds, for tests that never talk to
    /// the server itself.
    pub fn test_keycloak(&self, disable_probes: bool) -> Result<Keycloak, HarnessError> {
        let mut kc = crd::default_keycloak()?;
        kc.metadata.namespace = Some(self.namespace.clone());
        if let Some(image) = &self.custom_image {
            kc.spec.image = Some(image.clone());
        }
        kc.spec = crd::with_probes_disabled(&kc.spec, disable_probes);
        Ok(kc)
    }

    /// Namespaced API of any resource kind
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn keycloaks(&self) -> Api<Keycloak> {
        self.api()
    }

    pub fn realm_imports(&self) -> Api<KeycloakRealmImport> {
        self.api()
    }
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("namespace", &self.namespace)
            .field("mode", &self.mode)
            .field("custom_image", &self.custom_image)
            .field("kubernetes_host", &self.kubernetes_host)
            .field("is_openshift", &self.is_openshift)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_server, not_found};

    fn context(client: Client, custom_image: Option<&str>) -> TestContext {
        TestContext {
            client,
            namespace: "keycloak-test-abc".to_string(),
            mode: DeploymentMode::Local,
            custom_image: custom_image.map(str::to_string),
            kubernetes_host: "localhost".to_string(),
            is_openshift: false,
            timings: Timings::default(),
        }
    }

    #[tokio::test]
    async fn test_keycloak_bound_to_namespace_with_custom_image() {
        let server = api_server(|_, _| not_found());
        let ctx = context(server.client.clone(), Some("quay.io/keycloak/keycloak:nightly"));

        let kc = ctx.test_keycloak(false).unwrap();

        assert_eq!(kc.metadata.namespace.as_deref(), Some("keycloak-test-abc"));
        assert_eq!(
            kc.spec.image.as_deref(),
            Some("quay.io/keycloak/keycloak:nightly")
        );
        assert!(kc.spec.unsupported.is_none());
    }

    #[tokio::test]
    async fn test_keycloak_keeps_fixture_image_without_override() {
        let server = api_server(|_, _| not_found());
        let ctx = context(server.client.clone(), None);

        let kc = ctx.test_keycloak(false).unwrap();

        assert_eq!(kc.spec.image, crd::default_keycloak().unwrap().spec.image);
    }

    #[tokio::test]
    async fn test_keycloak_with_probes_disabled() {
        let server = api_server(|_, _| not_found());
        let ctx = context(server.client.clone(), None);

        let kc = ctx.test_keycloak(true).unwrap();

        let container = &kc
            .spec
            .unsupported
            .as_ref()
            .and_then(|u| u.pod_template.as_ref())
            .and_then(|t| t.spec.as_ref())
            .unwrap()
            .containers[0];
        assert!(container.liveness_probe.is_some());
        assert!(container.readiness_probe.is_some());
        assert!(container.startup_probe.is_some());
    }
}
