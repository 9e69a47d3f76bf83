//! Polling for reclamation of a dropped reference.
//!
//! The harness keeps only a `Weak` handle on the subscriber it gave away and
//! polls until the publisher has released every strong reference. Release
//! latency is outside the harness's control, so callers classify checks
//! built on this as stochastic.

use std::sync::Weak;
use std::thread;
use std::time::Duration;

use crate::deadline::Deadline;
use crate::error::{RuleId, VerificationError};

/// Wait until no strong reference to `handle`'s referent remains.
pub fn expect_reclaimed<T: ?Sized>(
    handle: &Weak<T>,
    timeout: Duration,
    poll_interval: Duration,
    rule: RuleId,
    what: &str,
) -> Result<(), VerificationError> {
    let deadline = Deadline::after(timeout);
    loop {
        let strong = handle.strong_count();
        if strong == 0 {
            return Ok(());
        }
        if deadline.has_passed() {
            return Err(VerificationError::violation(
                rule,
                format!("{what} still has {strong} strong reference(s) after {timeout:?}"),
            ));
        }
        thread::sleep(poll_interval.min(deadline.remaining()));
    }
}
