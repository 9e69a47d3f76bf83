//! Protocol surface of a demand-driven reactive stream.
//!
//! A [`Publisher`] hands a [`Subscription`] to a [`Subscriber`] through
//! `on_subscribe`, then emits at most as many elements as the subscriber has
//! requested through that subscription, optionally followed by exactly one
//! terminal signal (`on_error` or `on_complete`).
//!
//! The traits here are what the verification drivers exercise. The two
//! publishers in [`range`] and [`iter`] are driving fixtures used by the
//! harness itself, not production implementations.

pub mod error;
pub mod iter;
pub mod range;

use std::sync::Arc;

pub use error::FlowError;
pub use iter::AsyncPublisher;
pub use range::RangePublisher;

/// Demand channel from a subscriber back to its publisher.
pub trait Subscription: Send + Sync {
    /// Request `n` more elements. `n <= 0` must be answered with an
    /// `on_error` carrying [`FlowError::IllegalArgument`].
    fn request(&self, n: i64);

    /// Stop the stream. Idempotent.
    fn cancel(&self);
}

/// Receiver side of the protocol.
pub trait Subscriber<T>: Send + Sync {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, element: T);
    fn on_error(&self, error: FlowError);
    fn on_complete(&self);
}

/// Producer side of the protocol.
///
/// `None` stands for an absent subscriber; implementations must reject it
/// synchronously with [`FlowError::NullArgument`] and signal nothing.
pub trait Publisher<T>: Send + Sync {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError>;
}

/// A stage that is both a subscriber of `T` and a publisher of `R`.
pub trait Processor<T, R>: Subscriber<T> + Publisher<R> {}

impl<T, R, P> Processor<T, R> for P where P: Subscriber<T> + Publisher<R> {}

/// Saturating demand accumulator for publisher implementations.
///
/// Demand at or above `i64::MAX` is treated as unbounded and never
/// decremented. Only call with `n > 0`.
pub fn add_demand(current: u64, n: i64) -> u64 {
    current.saturating_add(n as u64).min(UNBOUNDED_DEMAND)
}

pub const UNBOUNDED_DEMAND: u64 = i64::MAX as u64;
