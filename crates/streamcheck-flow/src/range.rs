//! Synchronous range publisher.
//!
//! Emits `make(0), make(1), ..., make(count - 1)` on whichever thread calls
//! `request`, then completes. Reentrant `request` calls from inside
//! `on_next` only add demand; the outermost call keeps draining, so the
//! recursion depth between `request` and `on_next` stays at one.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{add_demand, FlowError, Publisher, Subscriber, Subscription, UNBOUNDED_DEMAND};

type ElementFn<T> = Arc<dyn Fn(u64) -> T + Send + Sync>;

/// A cold publisher of `count` generated elements.
pub struct RangePublisher<T> {
    count: u64,
    make: ElementFn<T>,
}

impl<T: Send + 'static> RangePublisher<T> {
    pub fn new(count: u64, make: impl Fn(u64) -> T + Send + Sync + 'static) -> Self {
        Self {
            count,
            make: Arc::new(make),
        }
    }

    /// Number of elements each subscriber will receive.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl RangePublisher<i64> {
    /// The integers `start, start + 1, ..., start + count - 1`.
    pub fn integers(start: i64, count: u64) -> Self {
        Self::new(count, move |i| start + i as i64)
    }
}

impl<T: Send + 'static> Publisher<T> for RangePublisher<T> {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError> {
        let subscriber = subscriber.ok_or_else(FlowError::absent_subscriber)?;
        let subscription = Arc::new(RangeSubscription {
            make: Arc::clone(&self.make),
            state: Mutex::new(RangeState {
                subscriber: Some(Arc::clone(&subscriber)),
                next: 0,
                end: self.count,
                demand: 0,
                draining: false,
            }),
        });
        subscriber.on_subscribe(subscription.clone());
        // An empty range completes without waiting for demand.
        subscription.drain();
        Ok(())
    }
}

struct RangeState<T> {
    /// Dropped on cancel or terminal signal so the subscriber can be reclaimed.
    subscriber: Option<Arc<dyn Subscriber<T>>>,
    next: u64,
    end: u64,
    demand: u64,
    draining: bool,
}

struct RangeSubscription<T> {
    make: ElementFn<T>,
    state: Mutex<RangeState<T>>,
}

enum Step<T> {
    Next(Arc<dyn Subscriber<T>>, u64),
    Complete(Arc<dyn Subscriber<T>>),
    Idle,
}

impl<T> RangeSubscription<T> {
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining || state.subscriber.is_none() {
                return;
            }
            state.draining = true;
        }

        loop {
            let step = {
                let mut state = self.state.lock();
                match state.subscriber.clone() {
                    None => Step::Idle,
                    Some(subscriber) if state.next == state.end => {
                        state.subscriber = None;
                        Step::Complete(subscriber)
                    }
                    Some(subscriber) if state.demand > 0 => {
                        if state.demand != UNBOUNDED_DEMAND {
                            state.demand -= 1;
                        }
                        let index = state.next;
                        state.next += 1;
                        Step::Next(subscriber, index)
                    }
                    Some(_) => Step::Idle,
                }
            };

            match step {
                Step::Next(subscriber, index) => subscriber.on_next((self.make)(index)),
                Step::Complete(subscriber) => {
                    self.state.lock().draining = false;
                    subscriber.on_complete();
                    return;
                }
                Step::Idle => {
                    // Re-checked under the lock that clears the flag, so a
                    // concurrent `request` cannot be lost.
                    let mut state = self.state.lock();
                    let more = state.subscriber.is_some()
                        && (state.demand > 0 || state.next == state.end);
                    if !more {
                        state.draining = false;
                        return;
                    }
                }
            }
        }
    }
}

impl<T> Subscription for RangeSubscription<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            let subscriber = self.state.lock().subscriber.take();
            if let Some(subscriber) = subscriber {
                subscriber.on_error(FlowError::non_positive_request(n));
            }
            return;
        }
        {
            let mut state = self.state.lock();
            if state.subscriber.is_none() {
                return;
            }
            state.demand = add_demand(state.demand, n);
        }
        self.drain();
    }

    fn cancel(&self) {
        let dropped = self.state.lock().subscriber.take();
        if dropped.is_some() {
            tracing::trace!("range subscription cancelled");
        }
    }
}
