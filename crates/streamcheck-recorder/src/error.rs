use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifies the protocol rule a check verifies, e.g. `§1.09`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    /// A numbered rule: section 1 (publisher), 2 (subscriber), 3 (subscription).
    Spec { section: u8, rule: u8 },
    /// A sanity check of the harness or fixture itself.
    Harness,
}

impl RuleId {
    pub const fn spec(section: u8, rule: u8) -> Self {
        RuleId::Spec { section, rule }
    }

    /// The token used in test names: `spec109`, `spec317` or `harness`.
    pub fn tag(&self) -> String {
        match self {
            RuleId::Spec { section, rule } => format!("spec{section}{rule:02}"),
            RuleId::Harness => "harness".to_string(),
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleId::Spec { section, rule } => write!(f, "§{section}.{rule:02}"),
            RuleId::Harness => write!(f, "harness"),
        }
    }
}

/// Why a single verification step failed.
///
/// `NoSignal` and `WrongSignal` are kept apart so a report can tell
/// "nothing happened" from "the wrong thing happened".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VerificationError {
    #[error("{rule}: did not receive {expected} within {waited:?}")]
    NoSignal {
        rule: RuleId,
        expected: String,
        waited: Duration,
    },

    #[error("{rule}: expected {expected} but received {observed}")]
    WrongSignal {
        rule: RuleId,
        expected: String,
        observed: String,
    },

    #[error("{rule}: expected no signal within {window:?} but received {observed}")]
    UnexpectedSignal {
        rule: RuleId,
        observed: String,
        window: Duration,
    },

    #[error("{rule}: {message}")]
    Violation { rule: RuleId, message: String },

    /// The fixture handed the harness something unusable.
    #[error("harness misuse: {0}")]
    Misuse(String),
}

impl VerificationError {
    pub fn violation(rule: RuleId, message: impl Into<String>) -> Self {
        VerificationError::Violation {
            rule,
            message: message.into(),
        }
    }

    pub fn misuse(message: impl Into<String>) -> Self {
        VerificationError::Misuse(message.into())
    }

    pub fn rule(&self) -> RuleId {
        match self {
            VerificationError::NoSignal { rule, .. }
            | VerificationError::WrongSignal { rule, .. }
            | VerificationError::UnexpectedSignal { rule, .. }
            | VerificationError::Violation { rule, .. } => *rule,
            VerificationError::Misuse(_) => RuleId::Harness,
        }
    }

    /// True when nothing arrived at all, as opposed to something unexpected.
    pub fn is_timeout(&self) -> bool {
        matches!(self, VerificationError::NoSignal { .. })
    }
}
