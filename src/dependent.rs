//! Dependent database service
//!
//! The operator under test needs a PostgreSQL database. It is deployed once
//! per suite into the session namespace from bundled manifests.

use crate::config::Timings;
use crate::eventually::{eventually, Check};
use crate::manifest;
use crate::session::{improve_error_message, is_not_found, HarnessError};
use crate::wait::{ready_replicas, ResourceState};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, DeleteParams};
use kube::{Client, ResourceExt};
use tracing::info;

/// Name of the database StatefulSet
pub const DB_STATEFULSET: &str = "postgresql-db";

/// Name of the database Service
pub const DB_SERVICE: &str = "postgres-db";

/// Name of the Secret holding the database credentials
pub const DB_SECRET: &str = "keycloak-db-secret";

const DB_SECRET_YAML: &str = include_str!("../fixtures/example-db-secret.yaml");
const POSTGRES_YAML: &str = include_str!("../fixtures/example-postgres.yaml");

/// Deploy the database and wait until it is ready
///
/// Applies the credentials Secret, then the StatefulSet and Service, then
/// waits until the StatefulSet reports one ready replica. A StatefulSet the
/// API server does not return yet counts as not ready.
pub async fn deploy(client: &Client, namespace: &str, timings: Timings) -> Result<(), HarnessError> {
    for secret in manifest::parse_typed::<Secret>("example-db-secret.yaml", DB_SECRET_YAML)? {
        manifest::apply_namespaced(client, namespace, &secret).await?;
    }

    info!(namespace = %namespace, "Creating new PostgreSQL deployment");
    for object in manifest::load_objects("example-postgres.yaml", POSTGRES_YAML)? {
        let kind = object
            .types
            .as_ref()
            .map(|t| t.kind.clone())
            .unwrap_or_default();
        match kind.as_str() {
            "StatefulSet" => {
                let sts: StatefulSet = manifest::typed(&object)?;
                manifest::apply_namespaced(client, namespace, &sts).await?;
            }
            "Service" => {
                let svc: Service = manifest::typed(&object)?;
                manifest::apply_namespaced(client, namespace, &svc).await?;
            }
            other => {
                return Err(HarnessError::ManifestError {
                    path: "example-postgres.yaml".to_string(),
                    reason: format!("unexpected kind '{other}' for {}", object.name_any()),
                })
            }
        }
    }

    info!(namespace = %namespace, "Checking Postgres is running");
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    eventually(format!("statefulset/{DB_STATEFULSET}"), || {
        let statefulsets = statefulsets.clone();
        async move {
            let check = match statefulsets.get_opt(DB_STATEFULSET).await? {
                None => Check::Pending("not found".to_string()),
                Some(sts) if ready_replicas(&sts) == 1 => Check::Ready,
                Some(sts) => Check::Pending(sts.state_description()),
            };
            Ok::<_, kube::Error>(check)
        }
    })
    .timings(timings)
    .await_condition()
    .await?;

    info!(namespace = %namespace, "PostgreSQL is ready");
    Ok(())
}

/// Delete the database StatefulSet and wait until it is gone
pub async fn remove(client: &Client, namespace: &str, timings: Timings) -> Result<(), HarnessError> {
    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);

    match statefulsets.delete(DB_STATEFULSET, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(e) if is_not_found(&e) => {}
        Err(e) => {
            return Err(HarnessError::DeleteError(improve_error_message(
                &e,
                "StatefulSet",
                DB_STATEFULSET,
            )))
        }
    }

    eventually(format!("statefulset/{DB_STATEFULSET} deletion"), || {
        let statefulsets = statefulsets.clone();
        async move {
            info!("Waiting for postgres to be deleted");
            let check = match statefulsets.get_opt(DB_STATEFULSET).await? {
                None => Check::Ready,
                Some(_) => Check::Pending("still present".to_string()),
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
