//! Collector for violations detected on implementation threads.
//!
//! A probe that notices a protocol violation inside a callback cannot fail
//! the case directly (it is not on the case thread), so it reports here and
//! the runner checks the sink once the case body returns.

use parking_lot::Mutex;

use crate::error::VerificationError;

#[derive(Debug, Default)]
pub struct ErrorSink {
    errors: Mutex<Vec<VerificationError>>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a violation observed asynchronously.
    pub fn flop(&self, error: VerificationError) {
        tracing::warn!(rule = %error.rule(), %error, "asynchronous violation");
        self.errors.lock().push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn snapshot(&self) -> Vec<VerificationError> {
        self.errors.lock().clone()
    }

    /// The first reported violation, if any.
    pub fn verify_empty(&self) -> Result<(), VerificationError> {
        match self.errors.lock().first() {
            Some(first) => Err(first.clone()),
            None => Ok(()),
        }
    }
}
