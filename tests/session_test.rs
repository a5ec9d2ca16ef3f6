//! Session lifecycle against a real cluster
//!
//! Needs a kubeconfig and the generated CRD manifests under
//! `OPERATOR_TEST_BUILD_OUTPUT`.

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, PostParams};
use operator_harness::dependent::DB_STATEFULSET;
use operator_harness::{
    BoxError, ClusterSessionManager, HarnessConfig, ReconcilerRegistry, SessionState, Suite,
    TestContext,
};

fn manager() -> ClusterSessionManager {
    operator_harness::telemetry::init_logging();
    let config = HarnessConfig::from_env().expect("valid OPERATOR_TEST_* environment");
    ClusterSessionManager::new(config, ReconcilerRegistry::new())
}

async fn database_is_ready(ctx: TestContext) -> Result<(), BoxError> {
    let statefulsets: Api<StatefulSet> = ctx.api();
    let db = statefulsets.get(DB_STATEFULSET).await?;
    let ready = db.status.and_then(|s| s.ready_replicas).unwrap_or(0);
    assert_eq!(ready, 1);
    Ok(())
}

async fn creates_keycloak(ctx: TestContext) -> Result<(), BoxError> {
    let kc = ctx.test_keycloak(true)?;
    ctx.keycloaks().create(&PostParams::default(), &kc).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires real cluster
async fn test_session_lifecycle() {
    let mut manager = manager();

    manager.setup().await.expect("setup should reach Running");
    assert_eq!(manager.state(), SessionState::Running);

    manager.cleanup().await.expect("cleanup of an empty namespace");
    manager.cleanup().await.expect("cleanup is idempotent");

    manager.teardown().await.expect("namespace delete should be accepted");
    assert_eq!(manager.state(), SessionState::Closed);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore] // Requires real cluster
async fn test_suite_runs_tests_in_one_namespace() {
    let report = Suite::new("SessionTest", manager())
        .test("database_is_ready", database_is_ready)
        .test("creates_keycloak", creates_keycloak)
        .test("database_still_ready", database_is_ready)
        .run()
        .await
        .expect("suite should set up and tear down");

    eprintln!("{report}");
    report.assert_passed();
}
