//! Deadlines for waits whose timeout may come from user configuration.
//!
//! `Instant + Duration` panics on overflow, and a configured timeout such as
//! `u64::MAX` milliseconds overflows on every platform. A deadline that does
//! not fit is treated as no deadline at all.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            timeout,
        }
    }

    pub(crate) fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left. Without a representable deadline this is the full timeout,
    /// which the waiters below hand to APIs that saturate on their own.
    pub(crate) fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => self.timeout,
        }
    }

    pub(crate) fn has_passed(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_timeout_has_no_deadline() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(deadline.instant().is_none());
        assert!(!deadline.has_passed());
        assert_eq!(deadline.remaining(), Duration::MAX);
    }

    #[test]
    fn test_zero_timeout_passes_immediately() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.has_passed());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
