use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;
use streamcheck_flow::{FlowError, Publisher, RangePublisher, Subscriber, Subscription};

#[derive(Default)]
struct Tally {
    elements: Mutex<Vec<i64>>,
    errors: Mutex<Vec<FlowError>>,
    completions: Mutex<u32>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
}

impl Tally {
    fn subscription(&self) -> Arc<dyn Subscription> {
        self.subscription.lock().clone().expect("subscribed")
    }
}

impl Subscriber<i64> for Tally {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock() = Some(subscription);
    }
    fn on_next(&self, element: i64) {
        self.elements.lock().push(element);
    }
    fn on_error(&self, error: FlowError) {
        self.errors.lock().push(error);
    }
    fn on_complete(&self) {
        *self.completions.lock() += 1;
    }
}

#[test]
fn test_round_trip_one_to_five() {
    let publisher = RangePublisher::integers(1, 5);
    let tally = Arc::new(Tally::default());
    publisher.subscribe(Some(tally.clone())).unwrap();

    tally.subscription().request(5);

    assert_eq!(*tally.elements.lock(), vec![1, 2, 3, 4, 5]);
    assert_eq!(*tally.completions.lock(), 1);
    assert!(tally.errors.lock().is_empty());
}

#[test]
fn test_request_zero_fails_without_elements() {
    let publisher = RangePublisher::integers(0, 10);
    let tally = Arc::new(Tally::default());
    publisher.subscribe(Some(tally.clone())).unwrap();

    tally.subscription().request(0);
    tally.subscription().request(5);

    assert!(tally.elements.lock().is_empty());
    let errors = tally.errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_illegal_argument());
}

#[test]
fn test_cancel_is_idempotent_and_stops_delivery() {
    let publisher = RangePublisher::integers(0, 10);
    let tally = Arc::new(Tally::default());
    publisher.subscribe(Some(tally.clone())).unwrap();

    tally.subscription().request(2);
    tally.subscription().cancel();
    tally.subscription().cancel();
    tally.subscription().request(3);

    assert_eq!(tally.elements.lock().len(), 2);
    assert_eq!(*tally.completions.lock(), 0);
    assert!(tally.errors.lock().is_empty());
}

#[test]
fn test_cancel_releases_subscriber() {
    let publisher = RangePublisher::integers(0, 10);
    let tally = Arc::new(Tally::default());
    publisher.subscribe(Some(tally.clone())).unwrap();
    let subscription = tally.subscription();

    let weak = Arc::downgrade(&tally);
    subscription.cancel();
    drop(tally);
    assert_eq!(weak.strong_count(), 0);
}

#[test]
fn test_cumulative_demand_saturates_without_error() {
    let publisher = RangePublisher::integers(0, 3);
    let tally = Arc::new(Tally::default());
    publisher.subscribe(Some(tally.clone())).unwrap();

    tally.subscription().request(i64::MAX);
    tally.subscription().request(i64::MAX);

    assert_eq!(tally.elements.lock().len(), 3);
    assert!(tally.errors.lock().is_empty());
}

proptest! {
    #[test]
    fn prop_never_delivers_more_than_requested(
        count in 0u64..64,
        requests in proptest::collection::vec(1i64..8, 0..16),
    ) {
        let publisher = RangePublisher::integers(0, count);
        let tally = Arc::new(Tally::default());
        publisher.subscribe(Some(tally.clone())).unwrap();

        let mut requested = 0u64;
        for n in requests {
            tally.subscription().request(n);
            requested += n as u64;
            let delivered = tally.elements.lock().len() as u64;
            prop_assert!(delivered <= requested);
            prop_assert_eq!(delivered, requested.min(count));
        }
        let completed = *tally.completions.lock();
        prop_assert_eq!(completed, u32::from(requested >= count));
    }
}
