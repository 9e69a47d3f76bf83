use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use streamcheck_recorder::{ErrorSink, SignalRecorder, TimeoutConfig, VerificationError};

type ReleaseFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Releases {
    done: bool,
    pending: Vec<ReleaseFn>,
}

/// Everything one test case owns: a copy of the timeouts, a fresh sink
/// for violations detected on implementation threads, and the cancellations
/// to run once the case is over.
///
/// Cheap to clone; probes and stages created for the case hold clones.
#[derive(Clone)]
pub struct CaseContext {
    config: TimeoutConfig,
    errors: Arc<ErrorSink>,
    releases: Arc<Mutex<Releases>>,
}

impl CaseContext {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            errors: Arc::new(ErrorSink::new()),
            releases: Arc::new(Mutex::new(Releases::default())),
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// Wait-for-signal timeout.
    pub fn timeout(&self) -> Duration {
        self.config.default_timeout
    }

    /// Window after which a missing signal is taken as "will not arrive".
    pub fn no_signal_window(&self) -> Duration {
        self.config.no_signal_timeout
    }

    pub fn recorder<T: fmt::Debug>(&self, label: &str) -> SignalRecorder<T> {
        SignalRecorder::new(label)
    }

    /// Report a violation observed off the case thread.
    pub fn flop(&self, error: VerificationError) {
        self.errors.flop(error);
    }

    pub fn errors(&self) -> &ErrorSink {
        &self.errors
    }

    pub fn verify_no_async_errors(&self) -> Result<(), VerificationError> {
        self.errors.verify_empty()
    }

    /// Run `action` when the case ends, or right away if it already has.
    ///
    /// Harness subscribers register a cancel of every subscription they
    /// accept, so no publisher outlives its case.
    pub fn on_release(&self, action: impl FnOnce() + Send + 'static) {
        let mut releases = self.releases.lock();
        if releases.done {
            drop(releases);
            action();
        } else {
            releases.pending.push(Box::new(action));
        }
    }

    /// End the case: run every registered release action, no lock held.
    pub fn release(&self) {
        let pending = {
            let mut releases = self.releases.lock();
            releases.done = true;
            mem::take(&mut releases.pending)
        };
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "releasing case subscriptions");
        }
        for action in pending {
            action();
        }
    }
}

impl fmt::Debug for CaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseContext")
            .field("config", &self.config)
            .field("async_errors", &self.errors.len())
            .finish()
    }
}
