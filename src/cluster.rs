//! Cluster connection
//!
//! Builds clients from the inferred kubeconfig (or in-cluster config),
//! rebinds them to the session namespace, and detects properties of the
//! cluster tests depend on.

use crate::session::HarnessError;
use async_trait::async_trait;
use kube::Client;
use tracing::debug;

/// Host used when neither an override nor the cluster URL yields one
pub const DEFAULT_HOST: &str = "localhost";

/// API group served only by OpenShift clusters
pub const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// Source of Kubernetes clients for a session
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Create a client whose default namespace is `namespace`, or the
    /// kubeconfig default when `None`
    async fn connect(&self, namespace: Option<&str>) -> Result<Client, HarnessError>;

    /// Host of the cluster API endpoint, if known
    async fn cluster_host(&self) -> Option<String> {
        None
    }
}

/// Connector inferring configuration from the environment
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, namespace: Option<&str>) -> Result<Client, HarnessError> {
        let mut config = kube::Config::infer()
            .await
            .map_err(|e| HarnessError::ClientError(format!("failed to infer config: {e}")))?;
        if let Some(namespace) = namespace {
            config.default_namespace = namespace.to_string();
        }
        Client::try_from(config)
            .map_err(|e| HarnessError::ClientError(format!("failed to create client: {e}")))
    }

    async fn cluster_host(&self) -> Option<String> {
        let config = kube::Config::infer().await.ok()?;
        config.cluster_url.host().map(str::to_string)
    }
}

/// Pick the host tests use to reach the cluster
///
/// An explicit override wins, then the host of the cluster URL, then
/// [`DEFAULT_HOST`].
pub fn resolve_host(override_host: Option<&str>, cluster_host: Option<&str>) -> String {
    override_host
        .or(cluster_host)
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_HOST)
        .to_string()
}

/// Whether the cluster serves the OpenShift route API
///
/// Discovery failures count as "not OpenShift".
pub async fn is_openshift(client: &Client) -> bool {
    match client.list_api_groups().await {
        Ok(groups) => groups.groups.iter().any(|g| g.name == OPENSHIFT_ROUTE_GROUP),
        Err(e) => {
            debug!(error = %e, "API group discovery failed, assuming plain Kubernetes");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_server, not_found, ok};
    use http::Method;
    use serde_json::json;

    #[test]
    fn test_resolve_host() {
        assert_eq!(resolve_host(Some("10.0.0.5"), Some("api.example")), "10.0.0.5");
        assert_eq!(resolve_host(None, Some("api.example")), "api.example");
        assert_eq!(resolve_host(None, None), "localhost");
        assert_eq!(resolve_host(None, Some("")), "localhost");
    }

    #[tokio::test]
    async fn test_detects_openshift() {
        let server = api_server(|method, path| match (method, path) {
            (&Method::GET, "/apis") => ok(json!({
                "kind": "APIGroupList",
                "apiVersion": "v1",
                "groups": [{
                    "name": "route.openshift.io",
                    "versions": [{ "groupVersion": "route.openshift.io/v1", "version": "v1" }],
                    "preferredVersion": { "groupVersion": "route.openshift.io/v1", "version": "v1" }
                }]
            })),
            _ => not_found(),
        });

        assert!(is_openshift(&server.client).await);
    }

    #[tokio::test]
    async fn test_plain_kubernetes_and_discovery_failure() {
        let plain = api_server(|_, path| match path {
            "/apis" => ok(json!({ "kind": "APIGroupList", "apiVersion": "v1", "groups": [] })),
            _ => not_found(),
        });
        assert!(!is_openshift(&plain.client).await);

        let broken = api_server(|_, _| not_found());
        assert!(!is_openshift(&broken.client).await);
    }
}
