//! Single-assignment slot with a bounded wait.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::deadline::Deadline;
use crate::error::{RuleId, VerificationError};

/// The first [`set`](Self::set) wins; later attempts hand the value back so
/// the caller can flag them.
#[derive(Debug)]
pub struct OnceSlot<T> {
    value: Mutex<Option<T>>,
    cv: Condvar,
}

impl<T: Clone> OnceSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    /// Assign the slot. Returns the rejected value if it was already set.
    pub fn set(&self, value: T) -> Result<(), T> {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        self.cv.notify_all();
        Ok(())
    }

    pub fn get(&self) -> Option<T> {
        (*self.value.lock()).clone()
    }

    /// Wait for the slot to be assigned.
    pub fn wait(&self, timeout: Duration, rule: RuleId, expected: &str) -> Result<T, VerificationError> {
        let deadline = Deadline::after(timeout);
        let mut slot = self.value.lock();
        while slot.is_none() {
            match deadline.instant() {
                Some(at) => {
                    if self.cv.wait_until(&mut slot, at).timed_out() {
                        break;
                    }
                }
                None => self.cv.wait(&mut slot),
            }
        }
        (*slot).clone().ok_or_else(|| VerificationError::NoSignal {
            rule,
            expected: expected.to_string(),
            waited: timeout,
        })
    }
}

impl<T: Clone> Default for OnceSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_once_slot_rejects_second_assignment() {
        let slot = OnceSlot::new();
        assert!(slot.set(1).is_ok());
        assert_eq!(slot.set(2), Err(2));
        assert_eq!(slot.get(), Some(1));
    }

    #[test]
    fn test_once_slot_wait() {
        let slot = Arc::new(OnceSlot::new());
        let err = slot
            .wait(Duration::from_millis(10), RuleId::spec(2, 1), "puppet")
            .unwrap_err();
        assert!(err.is_timeout());

        let remote = Arc::clone(&slot);
        let handle = thread::spawn(move || remote.set("puppet").unwrap());
        let value = slot
            .wait(Duration::from_secs(2), RuleId::spec(2, 1), "puppet")
            .unwrap();
        assert_eq!(value, "puppet");
        handle.join().unwrap();
    }

    #[test]
    fn test_once_slot_wait_without_representable_deadline() {
        let slot = OnceSlot::new();
        slot.set(7u8).unwrap();
        assert_eq!(slot.wait(Duration::MAX, RuleId::Harness, "value").unwrap(), 7);

        let slot = Arc::new(OnceSlot::new());
        let remote = Arc::clone(&slot);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.set(9u8).unwrap();
        });
        assert_eq!(slot.wait(Duration::MAX, RuleId::Harness, "value").unwrap(), 9);
        handle.join().unwrap();
    }
}
