//! Multi-document YAML manifests
//!
//! Loads manifests into [`DynamicObject`]s and applies or deletes them with
//! server-side apply, resolving each object's API resource and scope through
//! discovery.

use crate::session::{improve_error_message, is_not_found, HarnessError};
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{self, ApiResource, Scope};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "operator-harness";

/// Parse every document of a YAML stream
///
/// Empty documents are skipped.
pub fn load_objects(source: &str, text: &str) -> Result<Vec<DynamicObject>, HarnessError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| manifest_error(source, e))?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject =
            serde_yaml::from_value(value).map_err(|e| manifest_error(source, e))?;
        if object.types.is_none() {
            return Err(manifest_error(source, "document without apiVersion/kind"));
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Read and parse a manifest file
pub async fn read_manifest(path: &Path) -> Result<Vec<DynamicObject>, HarnessError> {
    let source = path.display().to_string();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| manifest_error(&source, e))?;
    load_objects(&source, &text)
}

/// Deserialize every document of a YAML stream as `K`
pub fn parse_typed<K: DeserializeOwned>(source: &str, text: &str) -> Result<Vec<K>, HarnessError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| manifest_error(source, e))?;
        if value.is_null() {
            continue;
        }
        objects.push(serde_yaml::from_value(value).map_err(|e| manifest_error(source, e))?);
    }
    Ok(objects)
}

/// Convert a dynamic object into a typed one
pub fn typed<K: DeserializeOwned>(object: &DynamicObject) -> Result<K, HarnessError> {
    let value = serde_json::to_value(object).map_err(|e| manifest_error(&object.name_any(), e))?;
    serde_json::from_value(value).map_err(|e| manifest_error(&object.name_any(), e))
}

fn manifest_error(source: &str, reason: impl std::fmt::Display) -> HarnessError {
    HarnessError::ManifestError {
        path: source.to_string(),
        reason: reason.to_string(),
    }
}

fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, HarnessError> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| manifest_error(&object.name_any(), "object without apiVersion/kind"))?;
    let (group, version) = types
        .api_version
        .rsplit_once('/')
        .unwrap_or(("", types.api_version.as_str()));
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Api for the object, namespaced into `namespace` when the kind is
async fn api_for(
    client: &Client,
    object: &DynamicObject,
    namespace: &str,
) -> Result<(Api<DynamicObject>, ApiResource, bool), HarnessError> {
    let gvk = gvk_of(object)?;
    let (resource, capabilities) = discovery::pinned_kind(client, &gvk)
        .await
        .map_err(|e| HarnessError::ApplyError(improve_error_message(&e, &gvk.kind, &object.name_any())))?;

    let namespaced = matches!(capabilities.scope, Scope::Namespaced);
    let api = if namespaced {
        Api::namespaced_with(client.clone(), namespace, &resource)
    } else {
        Api::all_with(client.clone(), &resource)
    };
    Ok((api, resource, namespaced))
}

/// Server-side apply every object into `namespace`
///
/// Cluster-scoped objects are applied cluster-wide. Stops at the first
/// rejected object.
pub async fn apply_objects(
    client: &Client,
    namespace: &str,
    objects: &[DynamicObject],
) -> Result<(), HarnessError> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for object in objects {
        let (api, resource, namespaced) = api_for(client, object, namespace).await?;
        let name = object.name_any();

        let mut object = object.clone();
        if namespaced {
            object.metadata.namespace = Some(namespace.to_string());
        }

        api.patch(&name, &params, &Patch::Apply(&object))
            .await
            .map_err(|e| HarnessError::ApplyError(improve_error_message(&e, &resource.kind, &name)))?;

        info!(namespace = %namespace, kind = %resource.kind, name = %name, "Applied resource");
    }
    Ok(())
}

/// Delete every object from `namespace`
///
/// Objects that are already gone count as deleted. Every object is
/// attempted; the first failure is returned.
pub async fn delete_objects(
    client: &Client,
    namespace: &str,
    objects: &[DynamicObject],
) -> Result<(), HarnessError> {
    let mut first_error = None;

    for object in objects {
        let name = object.name_any();
        let result = match api_for(client, object, namespace).await {
            Ok((api, resource, _)) => match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!(namespace = %namespace, kind = %resource.kind, name = %name, "Deleted resource");
                    Ok(())
                }
                Err(e) if is_not_found(&e) => Ok(()),
                Err(e) => Err(HarnessError::DeleteError(improve_error_message(
                    &e,
                    &resource.kind,
                    &name,
                ))),
            },
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Server-side apply a typed namespaced resource
pub async fn apply_namespaced<K>(client: &Client, namespace: &str, resource: &K) -> Result<K, HarnessError>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + serde::Serialize
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);

    let mut resource = resource.clone();
    resource.meta_mut().namespace = Some(namespace.to_string());

    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| HarnessError::ApplyError("resource must have a name".to_string()))?;

    let kind = K::kind(&Default::default()).to_string();
    let applied = api
        .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&resource))
        .await
        .map_err(|e| HarnessError::ApplyError(improve_error_message(&e, &kind, &name)))?;

    info!(namespace = %namespace, kind = %kind, name = %name, "Applied resource");
    Ok(applied)
}

/// Server-side apply a typed cluster-scoped resource
pub async fn apply_cluster<K>(client: &Client, resource: &K) -> Result<K, HarnessError>
where
    K: kube::Resource<Scope = kube::core::ClusterResourceScope>
        + Clone
        + DeserializeOwned
        + serde::Serialize
        + std::fmt::Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::all(client.clone());

    let name = resource
        .meta()
        .name
        .clone()
        .ok_or_else(|| HarnessError::ApplyError("resource must have a name".to_string()))?;

    let kind = K::kind(&Default::default()).to_string();
    let applied = api
        .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(resource))
        .await
        .map_err(|e| HarnessError::ApplyError(improve_error_message(&e, &kind, &name)))?;

    info!(kind = %kind, name = %name, "Applied cluster-scoped resource");
    Ok(applied)
}
