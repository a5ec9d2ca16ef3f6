use super::{ClusterSessionManager, HarnessError};
use crate::context::TestContext;
use crate::diagnostics;
use crate::runner::{Lifecycle, TestInfo, TestOutcome};
use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
impl Lifecycle for ClusterSessionManager {
    type Fixture = TestContext;

    async fn setup(&mut self) -> Result<(), HarnessError> {
        ClusterSessionManager::setup(self).await
    }

    fn fixture(&self) -> Result<TestContext, HarnessError> {
        let session = self.running_session()?;
        Ok(TestContext::from_session(session, self.config.timings()))
    }

    async fn before_each(&mut self, test: &TestInfo) {
        let namespace = self
            .session
            .as_ref()
            .map_or("<none>", |s| s.namespace.as_str());
        info!(
            "\n------- STARTING: {test}\n------- Namespace: {namespace}\n------- Mode: {}",
            self.config.mode
        );
    }

    async fn on_failure(&mut self, test: &TestInfo, outcome: &TestOutcome) {
        let TestOutcome::Failed(reason) = outcome else {
            return;
        };
        let Some(session) = self.session.as_ref() else {
            return;
        };

        warn!(test = %test, reason = %reason, "Test failed, collecting diagnostics");
        let report =
            diagnostics::collect(&session.client, &session.namespace, &self.config.results_dir)
                .await;
        eprintln!("{report}");
    }

    async fn after_each(
        &mut self,
        _test: &TestInfo,
        _outcome: &TestOutcome,
    ) -> Result<(), HarnessError> {
        self.cleanup().await
    }

    async fn teardown(&mut self) -> Result<(), HarnessError> {
        ClusterSessionManager::teardown(self).await
    }
}
