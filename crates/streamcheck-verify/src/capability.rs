//! Capabilities a fixture declares so the drivers can skip cases whose
//! preconditions the implementation cannot meet, rather than fail them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::classify::{CaseResult, CaseStop, SkipReason};

/// Marker for "no upper bound on stream length".
pub const UNBOUNDED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherCapabilities {
    /// Longest stream the fixture can produce.
    pub max_elements: u64,
    /// Whether the fixture's streams ever complete.
    pub can_signal_completion: bool,
    /// Deepest synchronous `request` -> `on_next` nesting the publisher
    /// admits.
    pub bounded_recursion_depth: usize,
}

impl Default for PublisherCapabilities {
    fn default() -> Self {
        Self {
            max_elements: UNBOUNDED,
            can_signal_completion: true,
            bounded_recursion_depth: 1,
        }
    }
}

impl PublisherCapabilities {
    /// Streams of at most `max_elements`, completing normally.
    pub fn bounded(max_elements: u64) -> Self {
        Self {
            max_elements,
            ..Self::default()
        }
    }

    /// Endless streams that never complete.
    pub fn infinite() -> Self {
        Self {
            max_elements: UNBOUNDED,
            can_signal_completion: false,
            ..Self::default()
        }
    }

    pub fn with_recursion_depth(mut self, depth: usize) -> Self {
        self.bounded_recursion_depth = depth;
        self
    }

    pub fn supports(&self, elements: u64) -> bool {
        elements <= self.max_elements
    }

    pub fn require_elements(&self, elements: u64) -> CaseResult {
        if self.supports(elements) {
            Ok(())
        } else {
            Err(CaseStop::Skipped(SkipReason::Incapable {
                capability: "max_elements",
                detail: format!(
                    "case needs a stream of {elements} elements, fixture declares at most {}",
                    self.max_elements
                ),
            }))
        }
    }

    pub fn require_completion(&self) -> CaseResult {
        if self.can_signal_completion {
            Ok(())
        } else {
            Err(CaseStop::Skipped(SkipReason::Incapable {
                capability: "can_signal_completion",
                detail: "case needs a stream that completes".into(),
            }))
        }
    }
}

pub fn require_subscribers(max_supported: usize, needed: usize) -> CaseResult {
    if needed <= max_supported {
        Ok(())
    } else {
        Err(CaseStop::Skipped(SkipReason::Incapable {
            capability: "max_supported_subscribers",
            detail: format!("case needs {needed} subscribers, fixture supports {max_supported}"),
        }))
    }
}

/// Unwrap the fixture's optional failed publisher, skipping the case when
/// the implementation has none.
pub fn require_failed_publisher<P: ?Sized>(publisher: Option<Arc<P>>) -> Result<Arc<P>, CaseStop> {
    publisher.ok_or_else(|| {
        CaseStop::Skipped(SkipReason::Incapable {
            capability: "failed_publisher",
            detail: "fixture provides no failed publisher".into(),
        })
    })
}

/// `wanted`, or fewer when the fixture cannot produce that many.
pub(crate) fn at_most(capabilities: &PublisherCapabilities, wanted: u64) -> u64 {
    capabilities.max_elements.min(wanted)
}
