//! Case execution and reporting.
//!
//! Cases of one suite are independent and run in parallel on the rayon
//! pool. A panic inside a case (usually a fixture panicking in a callback
//! on the case thread) fails only that case.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use streamcheck_recorder::{RuleId, TimeoutConfig, VerificationError};

use crate::classify::{CaseStop, Classification, Outcome, SkipReason, TestCase};
use crate::context::CaseContext;

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub suite: String,
    pub name: String,
    pub rule: RuleId,
    pub classification: Classification,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

impl TestReport {
    pub fn is_pass(&self) -> bool {
        self.outcome.is_pass()
    }

    pub fn is_fail(&self) -> bool {
        self.outcome.is_fail()
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome.is_skipped()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Passes of stochastic cases, also counted in `passed`.
    pub stochastic: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub results: Vec<TestReport>,
}

impl SuiteReport {
    pub fn get(&self, name: &str) -> Option<&TestReport> {
        self.results.iter().find(|report| report.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestReport> {
        self.results.iter().filter(|report| report.is_fail())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for report in &self.results {
            match report.outcome {
                Outcome::Pass { stochastic } => {
                    summary.passed += 1;
                    if stochastic {
                        summary.stochastic += 1;
                    }
                }
                Outcome::Fail { .. } => summary.failed += 1,
                Outcome::Skipped { .. } => summary.skipped += 1,
            }
        }
        summary
    }

    pub fn merge(&mut self, other: SuiteReport) {
        self.results.extend(other.results);
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Run one case with a fresh context.
pub fn run_case<D>(suite: &str, driver: &D, case: &TestCase<D>, config: TimeoutConfig) -> TestReport {
    let name = case.name();
    let started = Instant::now();

    let outcome = match case.body() {
        Err(note) => skipped(SkipReason::NotVerifiable(note)),
        Ok(run) => {
            let ctx = CaseContext::new(config);
            let result = panic::catch_unwind(AssertUnwindSafe(|| run(driver, &ctx)))
                .unwrap_or_else(|payload| {
                    Err(CaseStop::Failed(VerificationError::violation(
                        case.rule,
                        format!("case panicked: {}", panic_message(payload.as_ref())),
                    )))
                })
                .and_then(|()| ctx.verify_no_async_errors().map_err(CaseStop::Failed));
            // Cancel whatever the case left subscribed.
            ctx.release();
            classify(case, result)
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Outcome::Fail { message, .. } => {
            tracing::info!(suite, case = %name, duration_ms, %message, "FAIL")
        }
        other => tracing::info!(suite, case = %name, duration_ms, outcome = %other, "done"),
    }

    TestReport {
        suite: suite.to_string(),
        name,
        rule: case.rule,
        classification: case.classification,
        outcome,
        duration_ms,
    }
}

/// Run every case; report order follows `cases`.
pub fn run_cases<D: Sync>(
    suite: &str,
    driver: &D,
    cases: &[TestCase<D>],
    config: TimeoutConfig,
) -> SuiteReport {
    let results = cases
        .par_iter()
        .map(|case| run_case(suite, driver, case, config))
        .collect();
    let report = SuiteReport { results };
    let summary = report.summary();
    tracing::info!(
        suite,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        stochastic = summary.stochastic,
        "suite finished"
    );
    report
}

pub fn run_named<D>(
    suite: &str,
    driver: &D,
    cases: &[TestCase<D>],
    name: &str,
    config: TimeoutConfig,
) -> Option<TestReport> {
    cases
        .iter()
        .find(|case| case.name() == name)
        .map(|case| run_case(suite, driver, case, config))
}

fn classify<D>(case: &TestCase<D>, result: Result<(), CaseStop>) -> Outcome {
    match (case.classification, result) {
        (classification, Ok(())) => Outcome::Pass {
            stochastic: classification == Classification::Stochastic,
        },
        (_, Err(CaseStop::Skipped(reason))) => skipped(reason),
        (Classification::Optional, Err(CaseStop::Failed(err))) => {
            skipped(SkipReason::OptionalUnsupported(err.to_string()))
        }
        (_, Err(CaseStop::Failed(err))) => Outcome::Fail {
            rule: err.rule(),
            message: err.to_string(),
        },
    }
}

fn skipped(reason: SkipReason) -> Outcome {
    Outcome::Skipped {
        reason: reason.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
