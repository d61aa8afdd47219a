//! Bounded-concurrency test scheduler.
//!
//! Every test gets its own task immediately. A counting semaphore admits at most
//! `concurrency` of them into their test body at a time. Each admitted test runs
//! against an isolated [`TestEnv`] that shares the devnet.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::devnet::Devnet;
use crate::env::TestEnv;
use crate::errors::Error;

pub type TestFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;
pub type TestFn = Arc<dyn Fn(Arc<TestEnv>) -> TestFuture + Send + Sync>;

/// Named test body run by [`run_tests`].
#[derive(Clone)]
pub struct TestSpec {
    pub name: String,
    pub description: String,
    pub run: TestFn,
}

impl TestSpec {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, run: F) -> Self
    where
        F: Fn(Arc<TestEnv>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            run: Arc::new(move |env: Arc<TestEnv>| Box::pin(run(env)) as TestFuture),
        }
    }
}

impl fmt::Debug for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

pub struct RunTestsParams {
    pub devnet: Arc<Devnet>,
    pub tests: Vec<TestSpec>,
    /// Maximum number of test bodies running at once, at least one.
    pub concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    /// Never admitted because the run's context ended first.
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
    pub duration: Duration,
}

/// Results of a scheduler run, in completion order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<TestResult>,
    /// Tests still running when the run's context ended.
    pub unfinished: Vec<String>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Skipped(_)))
    }

    fn count(&self, pred: impl Fn(&TestOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.results.iter().find(|r| r.name == name).map(|r| &r.outcome)
    }

    /// No test failed and every test finished.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.unfinished.is_empty()
    }

    /// Process exit code for the host test runner.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn log_summary(&self) {
        for result in &self.results {
            match &result.outcome {
                TestOutcome::Passed => {
                    info!(test = %result.name, duration = ?result.duration, "PASS")
                }
                TestOutcome::Failed(msg) => {
                    error!(test = %result.name, duration = ?result.duration, %msg, "FAIL")
                }
                TestOutcome::Skipped(msg) => warn!(test = %result.name, %msg, "SKIP"),
            }
        }
        for name in &self.unfinished {
            warn!(test = %name, "unfinished");
        }
        info!(
            passed = self.passed(),
            failed = self.failed(),
            skipped = self.skipped(),
            unfinished = self.unfinished.len(),
            "test run finished"
        );
    }
}

/// Run `params.tests` against `params.devnet`, at most `params.concurrency` at a time.
///
/// Returns once every test reported, or as soon as `ctx` ends. Tests still running at
/// that point are abandoned and listed in [`RunReport::unfinished`].
pub async fn run_tests(ctx: &Context, params: RunTestsParams) -> RunReport {
    let semaphore = Arc::new(Semaphore::new(params.concurrency.max(1)));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, TestResult)>();
    let mut pending: Vec<Option<String>> =
        params.tests.iter().map(|t| Some(t.name.clone())).collect();
    let mut remaining = pending.len();

    for (index, test) in params.tests.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let devnet = params.devnet.clone();
        let done_tx = done_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = run_one(&ctx, semaphore, devnet, test).await;
            let _ = done_tx.send((index, result));
        });
    }
    drop(done_tx);

    let mut report = RunReport::default();
    while remaining > 0 {
        tokio::select! {
            biased;
            done = done_rx.recv() => match done {
                Some((index, result)) => {
                    pending[index] = None;
                    remaining -= 1;
                    report.results.push(result);
                }
                None => break,
            },
            err = ctx.done() => {
                warn!(%err, remaining, "test run interrupted");
                break;
            }
        }
    }
    report.unfinished = pending.into_iter().flatten().collect();
    report
}

async fn run_one(
    ctx: &Context,
    semaphore: Arc<Semaphore>,
    devnet: Arc<Devnet>,
    test: TestSpec,
) -> TestResult {
    let started = Instant::now();
    let permit = tokio::select! {
        permit = semaphore.acquire_owned() => permit,
        err = ctx.done() => {
            return TestResult {
                name: test.name,
                outcome: TestOutcome::Skipped(err.to_string()),
                duration: started.elapsed(),
            };
        }
    };
    let Ok(_permit) = permit else {
        return TestResult {
            name: test.name,
            outcome: TestOutcome::Skipped("scheduler closed".to_string()),
            duration: started.elapsed(),
        };
    };

    info!(test = %test.name, "running test");
    let env = Arc::new(TestEnv::new(ctx.clone(), devnet));
    // a panicking body surfaces as a JoinError
    let body = tokio::spawn((test.run)(env.clone()));
    let outcome = match body.await {
        Ok(Ok(())) => TestOutcome::Passed,
        Ok(Err(err)) => TestOutcome::Failed(err.to_string()),
        Err(join) => TestOutcome::Failed(panic_message(join)),
    };
    env.release();

    TestResult {
        name: test.name,
        outcome,
        duration: started.elapsed(),
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "test task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
