//! Many-producer, single-consumer signal queue with bounded waits.
//!
//! Producers are implementation callback threads and never block. The
//! consumer is the case thread, which waits with an explicit timeout for the
//! next signal, or for a window of silence. Insertion order is preserved;
//! concurrent producers interleave but each producer's own signals stay in
//! the order it recorded them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use streamcheck_flow::{FlowError, Subscription};

use crate::deadline::Deadline;
use crate::error::{RuleId, VerificationError};
use crate::signal::{RecordedSignal, Signal};

pub struct SignalRecorder<T> {
    label: String,
    tx: Sender<RecordedSignal<T>>,
    rx: Receiver<RecordedSignal<T>>,
}

impl<T: fmt::Debug> SignalRecorder<T> {
    pub fn new(label: impl Into<String>) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            label: label.into(),
            tx,
            rx,
        }
    }

    /// Name used in log lines, e.g. `"subscriber"` or `"upstream"`.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append a signal. Never blocks, never fails.
    pub fn record(&self, signal: Signal<T>) {
        tracing::trace!(recorder = %self.label, signal = ?signal, "recorded");
        // The receiver lives as long as `self`, so the send cannot fail.
        let _ = self.tx.send(RecordedSignal::now(signal));
    }

    /// Number of signals waiting to be consumed.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Non-blocking poll.
    pub fn try_next(&self) -> Option<RecordedSignal<T>> {
        self.rx.try_recv().ok()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<RecordedSignal<T>> {
        self.rx.try_iter().collect()
    }

    /// Wait up to `timeout` for the next signal, whatever it is.
    pub fn expect_signal(
        &self,
        timeout: Duration,
        rule: RuleId,
        expected: &str,
    ) -> Result<Signal<T>, VerificationError> {
        match self.rx.recv_timeout(timeout) {
            Ok(recorded) => Ok(recorded.signal),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(VerificationError::NoSignal {
                    rule,
                    expected: expected.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Like [`expect_signal`](Self::expect_signal), but the next signal must
    /// satisfy `predicate`; anything else is a `WrongSignal` failure.
    pub fn expect_signal_matching(
        &self,
        timeout: Duration,
        rule: RuleId,
        expected: &str,
        predicate: impl Fn(&Signal<T>) -> bool,
    ) -> Result<Signal<T>, VerificationError> {
        self.expect_with(timeout, rule, expected, |signal| {
            if predicate(&signal) {
                Ok(signal)
            } else {
                Err(signal)
            }
        })
    }

    /// Wait for the next signal and convert it with `extract`. A signal that
    /// `extract` hands back is reported as the wrong signal.
    pub fn expect_with<R>(
        &self,
        timeout: Duration,
        rule: RuleId,
        expected: &str,
        extract: impl FnOnce(Signal<T>) -> Result<R, Signal<T>>,
    ) -> Result<R, VerificationError> {
        let signal = self.expect_signal(timeout, rule, expected)?;
        extract(signal).map_err(|observed| VerificationError::WrongSignal {
            rule,
            expected: expected.to_string(),
            observed: format!("{observed:?}"),
        })
    }

    /// Wait for a signal accepted by `extract`, discarding any signal for
    /// which `skip` returns true. The timeout covers the whole wait.
    pub fn expect_skipping<R>(
        &self,
        timeout: Duration,
        rule: RuleId,
        expected: &str,
        skip: impl Fn(&Signal<T>) -> bool,
        extract: impl Fn(Signal<T>) -> Result<R, Signal<T>>,
    ) -> Result<R, VerificationError> {
        let deadline = Deadline::after(timeout);
        loop {
            let signal = self.expect_signal(deadline.remaining(), rule, expected).map_err(|err| match err {
                VerificationError::NoSignal { rule, expected, .. } => VerificationError::NoSignal {
                    rule,
                    expected,
                    waited: timeout,
                },
                other => other,
            })?;
            if skip(&signal) {
                tracing::trace!(recorder = %self.label, signal = ?signal, "skipped");
                continue;
            }
            return extract(signal).map_err(|observed| VerificationError::WrongSignal {
                rule,
                expected: expected.to_string(),
                observed: format!("{observed:?}"),
            });
        }
    }

    /// Require silence for the full `window`.
    pub fn expect_no_signal(&self, window: Duration, rule: RuleId) -> Result<(), VerificationError> {
        self.expect_no_signal_except(window, rule, |_| false)
    }

    /// Require that nothing but `allowed` signals arrives within `window`.
    pub fn expect_no_signal_except(
        &self,
        window: Duration,
        rule: RuleId,
        allowed: impl Fn(&Signal<T>) -> bool,
    ) -> Result<(), VerificationError> {
        let deadline = Deadline::after(window);
        loop {
            match self.rx.recv_timeout(deadline.remaining()) {
                Ok(recorded) if allowed(&recorded.signal) => continue,
                Ok(recorded) => {
                    return Err(VerificationError::UnexpectedSignal {
                        rule,
                        observed: format!("{:?}", recorded.signal),
                        window,
                    })
                }
                Err(_) => return Ok(()),
            }
        }
    }

    pub fn expect_subscription(
        &self,
        timeout: Duration,
        rule: RuleId,
    ) -> Result<Arc<dyn Subscription>, VerificationError> {
        self.expect_with(timeout, rule, "onSubscribe", |signal| match signal {
            Signal::SubscriptionGranted(subscription) => Ok(subscription),
            other => Err(other),
        })
    }

    pub fn expect_element(&self, timeout: Duration, rule: RuleId) -> Result<T, VerificationError> {
        self.expect_with(timeout, rule, "onNext", |signal| match signal {
            Signal::ElementDelivered(element) => Ok(element),
            other => Err(other),
        })
    }

    pub fn expect_element_eq(
        &self,
        timeout: Duration,
        rule: RuleId,
        expected: &T,
    ) -> Result<(), VerificationError>
    where
        T: PartialEq,
    {
        let description = format!("onNext({expected:?})");
        self.expect_with(timeout, rule, &description, |signal| match signal {
            Signal::ElementDelivered(ref element) if element == expected => Ok(()),
            other => Err(other),
        })
    }

    pub fn expect_completion(&self, timeout: Duration, rule: RuleId) -> Result<(), VerificationError> {
        self.expect_with(timeout, rule, "onComplete", |signal| match signal {
            Signal::Completed => Ok(()),
            other => Err(other),
        })
    }

    pub fn expect_error(&self, timeout: Duration, rule: RuleId) -> Result<FlowError, VerificationError> {
        self.expect_with(timeout, rule, "onError", |signal| match signal {
            Signal::Failed(err) => Ok(err),
            other => Err(other),
        })
    }

    pub fn expect_demand(&self, timeout: Duration, rule: RuleId) -> Result<i64, VerificationError> {
        self.expect_with(timeout, rule, "request(n)", |signal| match signal {
            Signal::DemandRequested(n) => Ok(n),
            other => Err(other),
        })
    }

    /// Wait for `cancel()`, tolerating further `request(n)` calls on the way.
    pub fn expect_cancel(&self, timeout: Duration, rule: RuleId) -> Result<(), VerificationError> {
        self.expect_skipping(
            timeout,
            rule,
            "cancel",
            |signal| matches!(signal, Signal::DemandRequested(_)),
            |signal| match signal {
                Signal::Cancelled => Ok(()),
                other => Err(other),
            },
        )
    }
}

impl<T> fmt::Debug for SignalRecorder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalRecorder")
            .field("label", &self.label)
            .field("pending", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);
    const LONG: Duration = Duration::from_secs(2);

    #[test]
    fn test_expect_signal_returns_in_order() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::ElementDelivered(1u32));
        recorder.record(Signal::Completed);

        assert_eq!(recorder.expect_element(LONG, RuleId::Harness).unwrap(), 1);
        recorder.expect_completion(LONG, RuleId::Harness).unwrap();
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_timeout_is_no_signal() {
        let recorder: SignalRecorder<u32> = SignalRecorder::new("test");
        let err = recorder.expect_completion(SHORT, RuleId::spec(1, 5)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.rule(), RuleId::spec(1, 5));
    }

    #[test]
    fn test_wrong_signal_is_distinguished() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::ElementDelivered(9u32));
        let err = recorder.expect_completion(LONG, RuleId::spec(1, 5)).unwrap_err();
        match err {
            VerificationError::WrongSignal { observed, .. } => {
                assert_eq!(observed, "ElementDelivered(9)")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_expect_no_signal_reports_intruder() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::<u32>::Cancelled);
        let err = recorder.expect_no_signal(SHORT, RuleId::spec(3, 7)).unwrap_err();
        assert!(matches!(err, VerificationError::UnexpectedSignal { .. }));
        assert!(recorder.expect_no_signal(SHORT, RuleId::spec(3, 7)).is_ok());
    }

    #[test]
    fn test_expect_cancel_skips_demand() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::<u32>::DemandRequested(1));
        recorder.record(Signal::<u32>::DemandRequested(4));
        recorder.record(Signal::<u32>::Cancelled);
        recorder.expect_cancel(LONG, RuleId::spec(2, 6)).unwrap();
    }

    #[test]
    fn test_expect_element_eq_mismatch() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::ElementDelivered(2u32));
        let err = recorder.expect_element_eq(LONG, RuleId::Harness, &3).unwrap_err();
        assert!(err.to_string().contains("onNext(3)"));
    }

    #[test]
    fn test_cross_thread_delivery() {
        let recorder = Arc::new(SignalRecorder::<u8>::new("test"));
        let producer = Arc::clone(&recorder);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.record(Signal::DemandRequested(3));
        });
        let n = recorder.expect_demand(LONG, RuleId::spec(2, 1)).unwrap();
        assert_eq!(n, 3);
        handle.join().unwrap();
    }

    #[test]
    fn test_unrepresentable_timeout_still_waits() {
        let recorder = SignalRecorder::new("test");
        recorder.record(Signal::<u32>::DemandRequested(1));
        recorder.record(Signal::<u32>::Cancelled);
        recorder.expect_cancel(Duration::MAX, RuleId::spec(2, 6)).unwrap();

        recorder.record(Signal::<u32>::Completed);
        recorder
            .expect_skipping(
                Duration::MAX,
                RuleId::Harness,
                "onComplete",
                |_| false,
                |signal| match signal {
                    Signal::Completed => Ok(()),
                    other => Err(other),
                },
            )
            .unwrap();

        recorder.record(Signal::<u32>::Cancelled);
        let err = recorder
            .expect_no_signal(Duration::MAX, RuleId::spec(3, 7))
            .unwrap_err();
        assert!(matches!(err, VerificationError::UnexpectedSignal { .. }));
    }
}
