//! Thread-backed helper publisher.
//!
//! Every subscription gets its own worker thread; `on_subscribe` and all
//! later signals are delivered from that thread, never from the caller of
//! `subscribe` or `request`. Demand and cancellation reach the worker over a
//! crossbeam channel.

use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::{add_demand, FlowError, Publisher, Subscriber, Subscription, UNBOUNDED_DEMAND};

type ElementFn<T> = Arc<dyn Fn(u64) -> T + Send + Sync>;

enum Source<T> {
    Generated { count: u64, make: ElementFn<T> },
    Failing(FlowError),
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Source::Generated { count, make } => Source::Generated {
                count: *count,
                make: Arc::clone(make),
            },
            Source::Failing(err) => Source::Failing(err.clone()),
        }
    }
}

/// Asynchronous publisher over generated elements, or one that fails every
/// subscriber right after `on_subscribe`.
pub struct AsyncPublisher<T> {
    source: Source<T>,
}

impl<T: Send + 'static> AsyncPublisher<T> {
    /// `count` elements produced by `make(0..count)`. `u64::MAX` is
    /// effectively endless.
    pub fn generate(count: u64, make: impl Fn(u64) -> T + Send + Sync + 'static) -> Self {
        Self {
            source: Source::Generated {
                count,
                make: Arc::new(make),
            },
        }
    }

    pub fn from_vec(elements: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        let elements = Arc::new(elements);
        let count = elements.len() as u64;
        Self::generate(count, move |i| elements[i as usize].clone())
    }

    /// Signals `on_subscribe` followed by `on_error(error)`.
    pub fn failing(error: FlowError) -> Self {
        Self {
            source: Source::Failing(error),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for AsyncPublisher<T> {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError> {
        let subscriber = subscriber.ok_or_else(FlowError::absent_subscriber)?;
        let (tx, rx) = channel::unbounded();
        let source = self.source.clone();
        thread::Builder::new()
            .name("async-publisher".to_string())
            .spawn(move || run_worker(source, subscriber, tx, rx))
            .map_err(|e| FlowError::Failed(format!("cannot spawn publisher worker: {e}")))?;
        Ok(())
    }
}

enum Command {
    Request(i64),
    Cancel,
}

struct ChannelSubscription {
    commands: Sender<Command>,
}

impl Subscription for ChannelSubscription {
    fn request(&self, n: i64) {
        // The worker may already be gone; requests after termination are no-ops.
        let _ = self.commands.send(Command::Request(n));
    }

    fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }
}

fn run_worker<T>(
    source: Source<T>,
    subscriber: Arc<dyn Subscriber<T>>,
    tx: Sender<Command>,
    rx: Receiver<Command>,
) {
    subscriber.on_subscribe(Arc::new(ChannelSubscription { commands: tx }));

    let (count, make) = match source {
        Source::Failing(err) => {
            subscriber.on_error(err);
            return;
        }
        Source::Generated { count, make } => (count, make),
    };

    let mut next = 0u64;
    let mut demand = 0u64;
    loop {
        if next == count {
            subscriber.on_complete();
            return;
        }

        let command = if demand > 0 {
            match rx.try_recv() {
                Ok(command) => Some(command),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return,
            }
        } else {
            match rx.recv() {
                Ok(command) => Some(command),
                // Every subscription handle was dropped: nobody can request again.
                Err(_) => return,
            }
        };

        match command {
            Some(Command::Cancel) => {
                tracing::trace!(delivered = next, "async publisher cancelled");
                return;
            }
            Some(Command::Request(n)) if n <= 0 => {
                subscriber.on_error(FlowError::non_positive_request(n));
                return;
            }
            Some(Command::Request(n)) => demand = add_demand(demand, n),
            None => {}
        }

        if demand > 0 {
            if demand != UNBOUNDED_DEMAND {
                demand -= 1;
            }
            subscriber.on_next(make(next));
            next += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    enum Seen {
        Next(u32),
        Error,
        Complete,
    }

    struct Forward {
        tx: Sender<Seen>,
        subscription: Mutex<Option<Arc<dyn Subscription>>>,
        initial: i64,
    }

    impl Subscriber<u32> for Forward {
        fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
            subscription.request(self.initial);
            *self.subscription.lock() = Some(subscription);
        }
        fn on_next(&self, element: u32) {
            self.tx.send(Seen::Next(element)).unwrap();
        }
        fn on_error(&self, _error: FlowError) {
            self.tx.send(Seen::Error).unwrap();
        }
        fn on_complete(&self) {
            self.tx.send(Seen::Complete).unwrap();
        }
    }

    fn forward(initial: i64) -> (Arc<Forward>, Receiver<Seen>) {
        let (tx, rx) = channel::unbounded();
        let subscriber = Arc::new(Forward {
            tx,
            subscription: Mutex::new(None),
            initial,
        });
        (subscriber, rx)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_delivers_requested_elements_then_completes() {
        let publisher = AsyncPublisher::from_vec(vec![7u32, 8, 9]);
        let (subscriber, rx) = forward(10);
        publisher.subscribe(Some(subscriber)).unwrap();

        for expected in [7, 8, 9] {
            match rx.recv_timeout(WAIT).unwrap() {
                Seen::Next(v) => assert_eq!(v, expected),
                _ => panic!("expected element {expected}"),
            }
        }
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Seen::Complete));
    }

    #[test]
    fn test_respects_demand() {
        let publisher = AsyncPublisher::generate(100, |i| i as u32);
        let (subscriber, rx) = forward(2);
        publisher.subscribe(Some(subscriber)).unwrap();

        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Seen::Next(0)));
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Seen::Next(1)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_zero_request_signals_error() {
        let publisher = AsyncPublisher::generate(3, |i| i as u32);
        let (subscriber, rx) = forward(0);
        publisher.subscribe(Some(subscriber)).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Seen::Error));
    }

    #[test]
    fn test_failing_publisher_errors_after_subscribe() {
        let publisher: AsyncPublisher<u32> = AsyncPublisher::failing(FlowError::Failed("boom".into()));
        let (subscriber, rx) = forward(1);
        publisher.subscribe(Some(subscriber)).unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), Seen::Error));
    }
}
