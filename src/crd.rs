//! Managed custom resources
//!
//! The `Keycloak` and `KeycloakRealmImport` resources the operator under test
//! reconciles, installation of their CRDs, and helpers to build test
//! instances of them.

use crate::config::HarnessConfig;
use crate::eventually::{eventually, Check};
use crate::manifest;
use crate::session::HarnessError;
use k8s_openapi::api::core::v1::{Container, ExecAction, PodTemplateSpec, Probe};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, ListParams};
use kube::{Client, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Generated CRD manifest of [`Keycloak`], relative to the build output
pub const KEYCLOAK_CRD_FILE: &str = "keycloaks.k8s.keycloak.org-v1.yml";

/// Generated CRD manifest of [`KeycloakRealmImport`], relative to the build output
pub const REALM_IMPORT_CRD_FILE: &str = "keycloakrealmimports.k8s.keycloak.org-v1.yml";

/// Labels the operator puts on every resource it manages
pub const MANAGED_LABELS: [(&str, &str); 2] = [
    ("app", "keycloak"),
    ("app.kubernetes.io/managed-by", "keycloak-operator"),
];

const DEFAULT_KEYCLOAK: &str = include_str!("../fixtures/example-keycloak.yaml");

/// A Keycloak server deployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.keycloak.org",
    version = "v2alpha1",
    kind = "Keycloak",
    plural = "keycloaks",
    shortname = "kc",
    namespaced,
    status = "KeycloakStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Escape hatch merged into the generated pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported: Option<UnsupportedSpec>,

    /// Every other field (db, http, hostname, ...) is passed through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsupportedSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl KeycloakStatus {
    /// Whether the `Ready` condition holds
    pub fn is_ready(&self) -> bool {
        self.conditions.iter().any(|c| c.type_ == "Ready" && c.is_true())
    }
}

/// A status condition
///
/// `status` is normalized to a string; older operator versions report it as
/// a boolean.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, deserialize_with = "bool_or_string", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusCondition {
    pub fn is_true(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("true"))
    }
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Bool(b) => b.to_string(),
        Raw::Text(s) => s,
    }))
}

/// A realm imported into a Keycloak instance
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8s.keycloak.org",
    version = "v2alpha1",
    kind = "KeycloakRealmImport",
    plural = "keycloakrealmimports",
    namespaced,
    status = "KeycloakRealmImportStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakRealmImportSpec {
    /// Name of the `Keycloak` the realm is imported into
    pub keycloak_cr_name: String,

    /// Realm representation
    #[serde(default)]
    pub realm: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeycloakRealmImportStatus {
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

/// Label selector matching every resource the operator manages
pub fn managed_selector() -> String {
    MANAGED_LABELS
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Name of the StatefulSet the operator creates for `kc`
pub fn statefulset_name(kc: &Keycloak) -> String {
    kc.name_any()
}

/// The bundled example Keycloak
pub fn default_keycloak() -> Result<Keycloak, HarnessError> {
    serde_yaml::from_str(DEFAULT_KEYCLOAK).map_err(|e| HarnessError::ManifestError {
        path: "example-keycloak.yaml".to_string(),
        reason: e.to_string(),
    })
}

/// Copy of `spec` whose server container has no effective probes
///
/// When `disable` is set, the first container of the unsupported pod
/// template (created if absent) gets liveness, readiness and startup probes
/// that always succeed. Otherwise `spec` is returned unchanged.
#[must_use]
pub fn with_probes_disabled(spec: &KeycloakSpec, disable: bool) -> KeycloakSpec {
    let mut spec = spec.clone();
    if !disable {
        return spec;
    }

    let pod_spec = spec
        .unsupported
        .get_or_insert_with(UnsupportedSpec::default)
        .pod_template
        .get_or_insert_with(PodTemplateSpec::default)
        .spec
        .get_or_insert_with(Default::default);

    if pod_spec.containers.is_empty() {
        pod_spec.containers.push(Container::default());
    }
    let container = &mut pod_spec.containers[0];
    container.liveness_probe = Some(always_succeeds());
    container.readiness_probe = Some(always_succeeds());
    container.startup_probe = Some(always_succeeds());

    spec
}

fn always_succeeds() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["true".to_string()]),
        }),
        ..Default::default()
    }
}

/// Apply the generated CRDs and wait until the API server serves them
///
/// Reads both CRD manifests from the build output directory. Each kind is
/// considered served once a list request for it succeeds.
pub async fn install_crds(client: &Client, config: &HarnessConfig) -> Result<(), HarnessError> {
    for file in [KEYCLOAK_CRD_FILE, REALM_IMPORT_CRD_FILE] {
        let path = config.build_output.join(file);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HarnessError::ManifestError {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        for crd in manifest::parse_typed::<CustomResourceDefinition>(&path.display().to_string(), &text)? {
            manifest::apply_cluster(client, &crd)
                .await
                .map_err(|e| HarnessError::CrdError(e.to_string()))?;
            info!(crd = %crd.name_any(), "Applied CRD");
        }
    }

    wait_listable(Api::<Keycloak>::all(client.clone()), "keycloaks", config).await?;
    wait_listable(
        Api::<KeycloakRealmImport>::all(client.clone()),
        "keycloakrealmimports",
        config,
    )
    .await
}

async fn wait_listable<K>(
    api: Api<K>,
    plural: &str,
    config: &HarnessConfig,
) -> Result<(), HarnessError>
where
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    eventually(format!("crd/{plural}"), || {
        let api = api.clone();
        async move {
            api.list(&ListParams::default().limit(1)).await?;
            Ok::<_, kube::Error>(Check::Ready)
        }
    })
    .interval(config.crd_poll_interval)
    .timeout(config.timeout)
    .ignore_errors()
    .await_condition()
    .await?;
    Ok(())
}
