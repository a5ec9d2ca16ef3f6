//! Namespace isolation
//!
//! Every suite runs in its own namespace so suites can share a cluster.
//! Names are derived from a random UUID and never repeat within a run.

use crate::config::Timings;
use crate::eventually::{eventually, Check};
use crate::session::{improve_error_message, is_not_found, HarnessError};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use tracing::info;

/// Build a namespace name from a prefix and a token
#[must_use]
pub fn namespace_name_from(prefix: &str, token: &str) -> String {
    format!("{prefix}-{token}")
}

/// Generate a fresh namespace name
#[must_use]
pub fn new_namespace_name(prefix: &str) -> String {
    namespace_name_from(prefix, &uuid::Uuid::new_v4().to_string())
}

/// Create the namespace, labelled `app=<label>`
pub async fn create_namespace(client: &Client, name: &str, label: &str) -> Result<(), HarnessError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some([("app".to_string(), label.to_string())].into_iter().collect()),
            ..Default::default()
        },
        ..Default::default()
    };

    namespaces
        .create(&PostParams::default(), &ns)
        .await
        .map_err(|e| HarnessError::NamespaceError(improve_error_message(&e, "Namespace", name)))?;

    info!(namespace = %name, "Created test namespace");
    Ok(())
}

/// Request deletion of the namespace
///
/// Does not wait for termination. A namespace that is already gone counts
/// as accepted.
pub async fn delete_namespace(client: &Client, name: &str) -> Result<(), HarnessError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            info!(namespace = %name, "Deleted test namespace");
            Ok(())
        }
        Err(e) if is_not_found(&e) => {
            info!(namespace = %name, "Namespace already gone");
            Ok(())
        }
        Err(e) => Err(HarnessError::CleanupError(improve_error_message(
            &e,
            "Namespace",
            name,
        ))),
    }
}

/// Wait until the namespace no longer exists
pub async fn wait_namespace_deleted(
    client: &Client,
    name: &str,
    timings: Timings,
) -> Result<(), HarnessError> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    eventually(format!("namespace/{name}"), || {
        let namespaces = namespaces.clone();
        let name = name.to_string();
        async move {
            let check = match namespaces.get_opt(&name).await? {
                None => Check::Ready,
                Some(ns) => Check::Pending(format!(
                    "phase={}",
                    ns.status
                        .and_then(|s| s.phase)
                        .unwrap_or_else(|| "Unknown".to_string())
                )),
            };
            Ok::<_, kube::Error>(check)
        }
    })
    .timings(timings)
    .ignore_errors()
    .await_condition()
    .await?;

    Ok(())
}
