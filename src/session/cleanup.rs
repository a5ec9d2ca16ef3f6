use super::{improve_error_message, is_not_found, ClusterSessionManager, HarnessError};
use crate::crd::{self, Keycloak, KeycloakRealmImport};
use crate::eventually::{eventually, Check};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::info;

impl ClusterSessionManager {
    /// Remove what a test left behind
    ///
    /// Deletes every managed custom resource in the namespace, then waits
    /// until the operator has removed all StatefulSets it manages. Safe to
    /// call repeatedly.
    pub async fn cleanup(&self) -> Result<(), HarnessError> {
        let session = self.running_session()?;
        let client = &session.client;
        let namespace = &session.namespace;

        info!(namespace = %namespace, "Deleting Keycloak CRs");
        delete_all::<Keycloak>(client, namespace).await?;
        delete_all::<KeycloakRealmImport>(client, namespace).await?;

        let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
        let selector = ListParams::default().labels(&crd::managed_selector());

        eventually(format!("managed statefulsets in {namespace}"), || {
            let statefulsets = statefulsets.clone();
            let selector = selector.clone();
            async move {
                let remaining = statefulsets.list(&selector).await?;
                let check = if remaining.items.is_empty() {
                    Check::Ready
                } else {
                    Check::Pending(format!("{} statefulsets remaining", remaining.items.len()))
                };
                Ok::<_, kube::Error>(check)
            }
        })
        .timings(self.config.timings())
        .await_condition()
        .await?;

        Ok(())
    }
}

async fn delete_all<K>(client: &Client, namespace: &str) -> Result<(), HarnessError>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let kind = K::kind(&Default::default()).to_string();

    match api
        .delete_collection(&DeleteParams::default(), &ListParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(HarnessError::CleanupError(improve_error_message(
            &e, &kind, "*",
        ))),
    }
}
