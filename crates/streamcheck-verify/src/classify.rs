//! Static test metadata and per-case outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use streamcheck_recorder::{RuleId, VerificationError};

use crate::context::CaseContext;

/// How much a case's result can be trusted. Attached statically to each case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The rule is mandatory and mechanically verifiable.
    Required,
    /// The rule is permissive; a failure means "not supported" and is
    /// reported as skipped.
    Optional,
    /// The check runs, but a pass does not prove compliance.
    Stochastic,
    /// The rule cannot be verified from outside; never runs.
    Untested,
}

impl Classification {
    pub fn prefix(&self) -> &'static str {
        match self {
            Classification::Required => "required",
            Classification::Optional => "optional",
            Classification::Stochastic => "stochastic",
            Classification::Untested => "untested",
        }
    }
}

/// Why a case did not produce a pass or a fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The fixture declared it cannot satisfy the precondition.
    Incapable {
        capability: &'static str,
        detail: String,
    },
    /// An optional rule that the implementation does not support.
    OptionalUnsupported(String),
    /// The rule is not externally observable.
    NotVerifiable(&'static str),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Incapable { capability, detail } => {
                write!(f, "fixture capability `{capability}` insufficient: {detail}")
            }
            SkipReason::OptionalUnsupported(detail) => {
                write!(f, "optional rule not supported: {detail}")
            }
            SkipReason::NotVerifiable(note) => write!(f, "not verifiable: {note}"),
        }
    }
}

/// Early exit from a case body.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseStop {
    Failed(VerificationError),
    Skipped(SkipReason),
}

impl From<VerificationError> for CaseStop {
    fn from(err: VerificationError) -> Self {
        CaseStop::Failed(err)
    }
}

pub type CaseResult = Result<(), CaseStop>;

/// Final result of one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// `stochastic` marks a pass that does not prove compliance.
    Pass { stochastic: bool },
    Fail { rule: RuleId, message: String },
    Skipped { reason: String },
}

impl Outcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Outcome::Fail { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass { stochastic: false } => write!(f, "PASS"),
            Outcome::Pass { stochastic: true } => write!(f, "PASS (stochastic, not a proof)"),
            Outcome::Fail { rule, message } => write!(f, "FAIL [{rule}] {message}"),
            Outcome::Skipped { reason } => write!(f, "SKIPPED {reason}"),
        }
    }
}

pub type CaseFn<D> = fn(&D, &CaseContext) -> CaseResult;

/// A registered check of driver `D`.
pub struct TestCase<D> {
    pub rule: RuleId,
    pub classification: Classification,
    /// camelCase description, the last part of the case name.
    pub description: &'static str,
    body: CaseBody<D>,
}

enum CaseBody<D> {
    Run(CaseFn<D>),
    Untested(&'static str),
}

impl<D> TestCase<D> {
    pub fn required(rule: RuleId, description: &'static str, run: CaseFn<D>) -> Self {
        Self::runnable(Classification::Required, rule, description, run)
    }

    pub fn optional(rule: RuleId, description: &'static str, run: CaseFn<D>) -> Self {
        Self::runnable(Classification::Optional, rule, description, run)
    }

    pub fn stochastic(rule: RuleId, description: &'static str, run: CaseFn<D>) -> Self {
        Self::runnable(Classification::Stochastic, rule, description, run)
    }

    pub fn untested(rule: RuleId, description: &'static str, note: &'static str) -> Self {
        Self {
            rule,
            classification: Classification::Untested,
            description,
            body: CaseBody::Untested(note),
        }
    }

    fn runnable(
        classification: Classification,
        rule: RuleId,
        description: &'static str,
        run: CaseFn<D>,
    ) -> Self {
        Self {
            rule,
            classification,
            description,
            body: CaseBody::Run(run),
        }
    }

    /// `{classification}_{rule tag}_{description}`.
    pub fn name(&self) -> String {
        format!(
            "{}_{}_{}",
            self.classification.prefix(),
            self.rule.tag(),
            self.description
        )
    }

    /// The case body, or the reason it never runs.
    pub fn body(&self) -> Result<CaseFn<D>, &'static str> {
        match self.body {
            CaseBody::Run(run) => Ok(run),
            CaseBody::Untested(note) => Err(note),
        }
    }
}
