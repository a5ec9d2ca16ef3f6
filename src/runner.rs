//! Suite runner
//!
//! Runs a list of async tests against a [`Lifecycle`], invoking its hooks in
//! a fixed order:
//!
//! ```text
//! setup
//! for each test:
//!     before_each -> test body -> on_failure (failed only) -> after_each
//! teardown
//! ```
//!
//! A test fails when it returns an error or panics. A test that calls
//! [`abort`] (or returns an [`Aborted`] error) is recorded as aborted:
//! cleanup still runs but no failure diagnostics are collected.

use crate::session::HarnessError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identifies the running test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestInfo {
    pub suite: String,
    pub name: String,
}

impl fmt::Display for TestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.suite, self.name)
    }
}

/// How a test ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Aborted(String),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Marks a test as aborted rather than failed
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct Aborted(pub String);

/// Abort the current test
///
/// The test is recorded as [`TestOutcome::Aborted`], which skips failure
/// diagnostics.
pub fn abort(reason: impl Into<String>) -> ! {
    std::panic::panic_any(Aborted(reason.into()))
}

/// Hooks a [`Suite`] invokes around its tests
#[async_trait]
pub trait Lifecycle: Send {
    /// Value handed to every test body
    type Fixture: Send + 'static;

    async fn setup(&mut self) -> Result<(), HarnessError>;

    fn fixture(&self) -> Result<Self::Fixture, HarnessError>;

    async fn before_each(&mut self, _test: &TestInfo) {}

    /// Called only for [`TestOutcome::Failed`], before `after_each`
    async fn on_failure(&mut self, _test: &TestInfo, _outcome: &TestOutcome) {}

    /// Called after every test regardless of outcome
    async fn after_each(
        &mut self,
        test: &TestInfo,
        outcome: &TestOutcome,
    ) -> Result<(), HarnessError>;

    async fn teardown(&mut self) -> Result<(), HarnessError>;
}

type TestFn<F> = Box<dyn Fn(F) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// An ordered list of tests sharing one lifecycle
pub struct Suite<L: Lifecycle> {
    name: String,
    lifecycle: L,
    tests: Vec<(String, TestFn<L::Fixture>)>,
}

impl<L: Lifecycle> Suite<L> {
    pub fn new(name: impl Into<String>, lifecycle: L) -> Self {
        Self {
            name: name.into(),
            lifecycle,
            tests: Vec::new(),
        }
    }

    /// Add a test
    pub fn test<F, Fut>(mut self, name: impl Into<String>, test: F) -> Self
    where
        F: Fn(L::Fixture) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.tests
            .push((name.into(), Box::new(move |fixture| test(fixture).boxed())));
        self
    }

    /// Run every test
    ///
    /// Setup failure is returned after a best-effort teardown; no tests run.
    /// A cleanup failure after a passing test fails that test. A teardown
    /// failure is returned as [`HarnessError::TeardownFailed`], which still
    /// carries the test outcomes.
    pub async fn run(mut self) -> Result<SuiteReport, HarnessError> {
        if let Err(e) = self.lifecycle.setup().await {
            error!(suite = %self.name, error = %e, "Suite setup failed");
            if let Err(teardown) = self.lifecycle.teardown().await {
                warn!(suite = %self.name, error = %teardown, "Teardown after failed setup also failed");
            }
            return Err(e);
        }

        let mut results = Vec::with_capacity(self.tests.len());
        for (name, test) in &self.tests {
            let info = TestInfo {
                suite: self.name.clone(),
                name: name.clone(),
            };

            self.lifecycle.before_each(&info).await;

            let outcome = match self.lifecycle.fixture() {
                Ok(fixture) => run_test(test(fixture)).await,
                Err(e) => TestOutcome::Failed(format!("fixture unavailable: {e}")),
            };

            if outcome.is_failed() {
                warn!(test = %info, outcome = %outcome, "Test failed");
                self.lifecycle.on_failure(&info, &outcome).await;
            }

            let outcome = match self.lifecycle.after_each(&info, &outcome).await {
                Ok(()) => outcome,
                Err(e) if outcome.is_passed() => TestOutcome::Failed(format!("cleanup failed: {e}")),
                Err(e) => {
                    warn!(test = %info, error = %e, "Cleanup after test failed");
                    outcome
                }
            };

            info!(test = %info, outcome = %outcome, "Test finished");
            results.push((name.clone(), outcome));
        }

        let report = SuiteReport {
            suite: self.name,
            results,
        };

        if let Err(e) = self.lifecycle.teardown().await {
            error!(suite = %report.suite, error = %e, failed = report.failed(), "Suite teardown failed");
            for (name, outcome) in report.results.iter().filter(|(_, o)| !o.is_passed()) {
                warn!(suite = %report.suite, test = %name, outcome = %outcome, "Outcome before teardown failure");
            }
            return Err(HarnessError::TeardownFailed {
                report,
                source: Box::new(e),
            });
        }

        Ok(report)
    }
}

async fn run_test(test: BoxFuture<'static, Result<(), BoxError>>) -> TestOutcome {
    match AssertUnwindSafe(test).catch_unwind().await {
        Ok(Ok(())) => TestOutcome::Passed,
        Ok(Err(e)) => match e.downcast_ref::<Aborted>() {
            Some(aborted) => TestOutcome::Aborted(aborted.0.clone()),
            None => TestOutcome::Failed(e.to_string()),
        },
        Err(panic) => outcome_from_panic(panic),
    }
}

fn outcome_from_panic(panic: Box<dyn Any + Send>) -> TestOutcome {
    if let Some(aborted) = panic.downcast_ref::<Aborted>() {
        return TestOutcome::Aborted(aborted.0.clone());
    }
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "test panicked".to_string());
    TestOutcome::Failed(message)
}

/// Outcomes of a suite run, in execution order
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub suite: String,
    pub results: Vec<(String, TestOutcome)>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_failed()).count()
    }

    pub fn aborted(&self) -> usize {
        self.results.iter().filter(|(_, o)| o.is_aborted()).count()
    }

    /// Outcome of the named test
    pub fn outcome(&self, test: &str) -> Option<&TestOutcome> {
        self.results
            .iter()
            .find(|(name, _)| name == test)
            .map(|(_, outcome)| outcome)
    }

    /// Panic listing every failed test, if any
    #[track_caller]
    pub fn assert_passed(&self) {
        let failures: Vec<String> = self
            .results
            .iter()
            .filter(|(_, o)| o.is_failed())
            .map(|(name, o)| format!("  {name}: {o}"))
            .collect();

        assert!(
            failures.is_empty(),
            "suite {} had {} failing test(s):\n{}",
            self.suite,
            failures.len(),
            failures.join("\n")
        );
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} passed, {} failed, {} aborted",
            self.suite,
            self.passed(),
            self.failed(),
            self.aborted()
        )
    }
}
