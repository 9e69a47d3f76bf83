//! Signals observed on the wire between a publisher and a subscriber.
//! Subscriber-side callbacks and subscription-side calls share one type so a
//! single recorder can hold either.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Instant;

use streamcheck_flow::{FlowError, Subscription};

/// All signal types a probe can record.
pub enum Signal<T> {
    /// `on_subscribe` was called with this subscription.
    SubscriptionGranted(Arc<dyn Subscription>),
    /// `on_next` delivered an element.
    ElementDelivered(T),
    /// `on_error` was called.
    Failed(FlowError),
    /// `on_complete` was called.
    Completed,
    /// `Subscription::request(n)` was called.
    DemandRequested(i64),
    /// `Subscription::cancel()` was called.
    Cancelled,
}

/// Payload-free discriminant of a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    SubscriptionGranted,
    ElementDelivered,
    Failed,
    Completed,
    DemandRequested,
    Cancelled,
}

impl<T> Signal<T> {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::SubscriptionGranted(_) => SignalKind::SubscriptionGranted,
            Signal::ElementDelivered(_) => SignalKind::ElementDelivered,
            Signal::Failed(_) => SignalKind::Failed,
            Signal::Completed => SignalKind::Completed,
            Signal::DemandRequested(_) => SignalKind::DemandRequested,
            Signal::Cancelled => SignalKind::Cancelled,
        }
    }

    /// `Failed` and `Completed` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Signal::Failed(_) | Signal::Completed)
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::SubscriptionGranted(_) => write!(f, "SubscriptionGranted"),
            Signal::ElementDelivered(element) => write!(f, "ElementDelivered({element:?})"),
            Signal::Failed(err) => write!(f, "Failed({err})"),
            Signal::Completed => write!(f, "Completed"),
            Signal::DemandRequested(n) => write!(f, "DemandRequested({n})"),
            Signal::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::SubscriptionGranted => "onSubscribe",
            SignalKind::ElementDelivered => "onNext",
            SignalKind::Failed => "onError",
            SignalKind::Completed => "onComplete",
            SignalKind::DemandRequested => "request",
            SignalKind::Cancelled => "cancel",
        };
        f.write_str(name)
    }
}

/// A signal with the metadata captured at its insertion point.
#[derive(Debug)]
pub struct RecordedSignal<T> {
    pub signal: Signal<T>,
    /// When the recorder accepted the signal.
    pub recorded_at: Instant,
    /// Implementation thread that produced it.
    pub thread: ThreadId,
}

impl<T> RecordedSignal<T> {
    pub fn now(signal: Signal<T>) -> Self {
        Self {
            signal,
            recorded_at: Instant::now(),
            thread: thread::current().id(),
        }
    }
}
