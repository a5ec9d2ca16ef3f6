//! Integration tests using the #[operator_harness::test] macro

use kube::api::{ListParams, PostParams};
use operator_harness::crd::statefulset_name;
use operator_harness::{abort, DeploymentMode, TestContext};

/// The macro:
/// - Sets up a session from the OPERATOR_TEST_* environment
/// - Injects TestContext as `ctx`
/// - Cleans managed resources up and tears the session down
#[operator_harness::test]
#[ignore] // Requires real cluster
async fn test_macro_creates_keycloak(ctx: TestContext) -> Result<(), kube::Error> {
    let kc = ctx.test_keycloak(true).expect("bundled Keycloak should parse");
    let created = ctx.keycloaks().create(&PostParams::default(), &kc).await?;

    assert_eq!(created.metadata.namespace.as_deref(), Some(ctx.namespace.as_str()));
    assert_eq!(statefulset_name(&created), "example-kc");
    Ok(())
}

/// Aborted tests skip diagnostics but still clean up
#[operator_harness::test]
#[ignore] // Requires real cluster
async fn test_macro_abort_on_openshift(ctx: TestContext) {
    if ctx.is_openshift {
        abort("not supported on OpenShift");
    }
    let keycloaks = ctx.keycloaks().list(&ListParams::default()).await.unwrap();
    assert!(keycloaks.items.is_empty(), "cleanup should leave no Keycloaks behind");
}

/// Without ctx the macro is a plain async test
#[operator_harness::test]
async fn test_macro_without_ctx() {
    let mode: DeploymentMode = "remote".parse().unwrap();
    assert_eq!(mode, DeploymentMode::Remote);
}
