//! Operator deployed into the cluster from generated manifests

use super::OperatorDeployment;
use crate::manifest;
use crate::session::HarnessError;
use async_trait::async_trait;
use kube::Client;
use std::path::PathBuf;
use tracing::info;

/// Applies the generated RBAC and Deployment into the session namespace
///
/// Readiness of the operator pod is not awaited; tests wait on the
/// resources the operator produces instead.
pub struct RemoteDeployment {
    manifest: PathBuf,
}

impl RemoteDeployment {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }
}

#[async_trait]
impl OperatorDeployment for RemoteDeployment {
    async fn start(&mut self, client: &Client, namespace: &str) -> Result<(), HarnessError> {
        info!(namespace = %namespace, manifest = %self.manifest.display(), "Creating RBAC and Deployment into namespace");
        let objects = manifest::read_manifest(&self.manifest).await?;
        manifest::apply_objects(client, namespace, &objects).await
    }

    async fn stop(&mut self, client: &Client, namespace: &str) -> Result<(), HarnessError> {
        info!(namespace = %namespace, "Deleting RBAC and Deployment from namespace");
        let objects = manifest::read_manifest(&self.manifest).await?;
        manifest::delete_objects(client, namespace, &objects).await
    }

    fn invalidates_client(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{api_server, not_found, object, ok, server_error};
    use http::Method;
    use serde_json::json;

    const OPERATOR_YAML: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: keycloak-operator
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: keycloak-operator
spec:
  replicas: 1
  selector:
    matchLabels:
      app.kubernetes.io/name: keycloak-operator
  template:
    metadata:
      labels:
        app.kubernetes.io/name: keycloak-operator
    spec:
      serviceAccountName: keycloak-operator
      containers:
        - name: keycloak-operator
          image: quay.io/keycloak/keycloak-operator:nightly
"#;

    fn discovery(method: &Method, path: &str) -> Option<(u16, serde_json::Value)> {
        let resource = |name: &str, kind: &str| {
            json!({
                "name": name,
                "singularName": kind.to_ascii_lowercase(),
                "namespaced": true,
                "kind": kind,
                "verbs": ["create", "delete", "get", "list", "patch"]
            })
        };
        match (method, path) {
            (&Method::GET, "/api/v1") => Some(ok(json!({
                "kind": "APIResourceList",
                "apiVersion": "v1",
                "groupVersion": "v1",
                "resources": [resource("serviceaccounts", "ServiceAccount")]
            }))),
            (&Method::GET, "/apis/apps/v1") => Some(ok(json!({
                "kind": "APIResourceList",
                "apiVersion": "v1",
                "groupVersion": "apps/v1",
                "resources": [resource("deployments", "Deployment")]
            }))),
            _ => None,
        }
    }

    fn write_manifest() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubernetes.yml");
        std::fs::write(&path, OPERATOR_YAML).unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_start_applies_every_document() {
        let (_dir, path) = write_manifest();
        let server = api_server(|method, path| {
            discovery(method, path).unwrap_or_else(|| match *method {
                Method::PATCH if path.contains("/deployments/") => {
                    ok(object("apps/v1", "Deployment", "keycloak-operator"))
                }
                Method::PATCH => ok(object("v1", "ServiceAccount", "keycloak-operator")),
                _ => not_found(),
            })
        });

        let mut deployment = RemoteDeployment::new(&path);
        deployment.start(&server.client, "ns").await.unwrap();

        assert_eq!(server.count("PATCH", "/api/v1/namespaces/ns/serviceaccounts/keycloak-operator"), 1);
        assert_eq!(server.count("PATCH", "/apis/apps/v1/namespaces/ns/deployments/keycloak-operator"), 1);
        // Operator pods are not polled
        assert!(!server.requests().iter().any(|r| r.contains("/pods")));
    }

    #[tokio::test]
    async fn test_stop_deletes_every_document() {
        let (_dir, path) = write_manifest();
        let server = api_server(|method, path| discovery(method, path).unwrap_or_else(not_found));

        let mut deployment = RemoteDeployment::new(&path);
        deployment.stop(&server.client, "ns").await.unwrap();

        assert_eq!(server.count("DELETE", "/api/v1/namespaces/ns/serviceaccounts/keycloak-operator"), 1);
        assert_eq!(server.count("DELETE", "/apis/apps/v1/namespaces/ns/deployments/keycloak-operator"), 1);
    }

    #[tokio::test]
    async fn test_start_reports_rejected_apply() {
        let (_dir, path) = write_manifest();
        let server = api_server(|method, path| discovery(method, path).unwrap_or_else(server_error));

        let err = RemoteDeployment::new(&path)
            .start(&server.client, "ns")
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::ApplyError(_)));
    }

    #[tokio::test]
    async fn test_start_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let server = api_server(|_, _| not_found());

        let err = RemoteDeployment::new(dir.path().join("kubernetes.yml"))
            .start(&server.client, "ns")
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::ManifestError { .. }));
        assert!(server.requests().is_empty());
    }
}
