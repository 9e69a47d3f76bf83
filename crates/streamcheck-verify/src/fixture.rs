//! What the user of the harness implements: factories for the component
//! under test plus a declaration of its capabilities.
//!
//! Every factory returns `Option`; `None` stands for "no instance" and fails
//! the case that asked for it, except `create_failed_publisher`, where it
//! means the implementation has no failure mode to offer and the dependent
//! cases are skipped.

use std::sync::Arc;

use streamcheck_flow::{Processor, Publisher, Subscriber};

use crate::capability::PublisherCapabilities;
use crate::probe::WhiteboxProbe;

pub trait PublisherFixture<T>: Send + Sync {
    /// A publisher that emits exactly `elements` elements, then completes if
    /// it can complete at all.
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<T>>>;

    /// A publisher that signals failure to every subscriber after granting
    /// the subscription.
    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<T>>> {
        None
    }

    fn capabilities(&self) -> PublisherCapabilities {
        PublisherCapabilities::default()
    }
}

/// A subscriber under whitebox test must forward each callback to the probe
/// it was created with, and register a puppet on `on_subscribe` that lets
/// the harness make it request or cancel.
pub trait WhiteboxSubscriberFixture<T>: Send + Sync {
    fn create_subscriber(&self, probe: WhiteboxProbe<T>) -> Option<Arc<dyn Subscriber<T>>>;

    fn create_element(&self, id: u64) -> T;
}

pub trait BlackboxSubscriberFixture<T>: Send + Sync {
    fn create_subscriber(&self) -> Option<Arc<dyn Subscriber<T>>>;

    fn create_element(&self, id: u64) -> T;

    /// A publisher of `elements` elements to feed the subscriber. Without
    /// one, the driver generates an asynchronous publisher over
    /// [`create_element`](Self::create_element).
    fn create_helper_publisher(&self, _elements: u64) -> Option<Arc<dyn Publisher<T>>> {
        None
    }

    /// Nudge a subscriber that only requests on an external trigger.
    fn trigger_request(&self, _subscriber: &Arc<dyn Subscriber<T>>) {}
}

/// Both faces of one identity processor instance.
pub struct ProcessorHandle<T> {
    subscriber: Arc<dyn Subscriber<T>>,
    publisher: Arc<dyn Publisher<T>>,
}

impl<T> Clone for ProcessorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            subscriber: Arc::clone(&self.subscriber),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<T: 'static> ProcessorHandle<T> {
    pub fn new<P: Processor<T, T> + 'static>(processor: Arc<P>) -> Self {
        Self {
            subscriber: processor.clone(),
            publisher: processor,
        }
    }

    pub fn subscriber(&self) -> Arc<dyn Subscriber<T>> {
        Arc::clone(&self.subscriber)
    }

    pub fn publisher(&self) -> Arc<dyn Publisher<T>> {
        Arc::clone(&self.publisher)
    }
}

pub trait IdentityProcessorFixture<T>: Send + Sync {
    /// A processor that forwards every input unchanged, buffering at least
    /// `buffer_size` elements.
    fn create_identity_processor(&self, buffer_size: usize) -> Option<ProcessorHandle<T>>;

    fn create_element(&self, id: u64) -> T;

    /// A publisher that fails immediately, standing in for a failed
    /// processor when the processor's publisher side is tested.
    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<T>>> {
        None
    }

    fn capabilities(&self) -> PublisherCapabilities {
        PublisherCapabilities::default()
    }

    /// How many downstream subscribers one processor serves at once.
    fn max_supported_subscribers(&self) -> usize {
        1
    }

    fn buffer_size(&self) -> usize {
        32
    }
}
