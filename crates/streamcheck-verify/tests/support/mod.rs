//! Fixtures shared by the driver tests: compliant components the drivers
//! must pass, and deliberately broken ones they must catch.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Once, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use streamcheck_flow::{
    add_demand, AsyncPublisher, FlowError, Publisher, RangePublisher, Subscriber, Subscription,
    UNBOUNDED_DEMAND,
};
use streamcheck_verify::{
    BlackboxSubscriberFixture, IdentityProcessorFixture, ProcessorHandle, PublisherCapabilities,
    PublisherFixture, SubscriptionPuppet, TimeoutConfig, WhiteboxProbe, WhiteboxSubscriberFixture,
};

static TRACING: Once = Once::new();

/// Generous timeouts so loaded CI machines do not produce spurious
/// failures, with a short silence window to keep the suites fast.
pub fn config() -> TimeoutConfig {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
    TimeoutConfig::default()
        .with_default_timeout(Duration::from_secs(2))
        .with_no_signal_timeout(Duration::from_millis(50))
        .with_reclamation_timeout(Duration::from_secs(2))
}

// ---------------------------------------------------------------------------
// Publishers
// ---------------------------------------------------------------------------

/// Synchronous integer ranges.
pub struct RangeFixture;

impl PublisherFixture<i64> for RangeFixture {
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(RangePublisher::integers(0, elements)))
    }

    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(AsyncPublisher::failing(FlowError::Failed(
            "source unavailable".into(),
        ))))
    }
}

/// Worker-thread publishers.
pub struct AsyncFixture;

impl PublisherFixture<i64> for AsyncFixture {
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(AsyncPublisher::generate(elements, |id| id as i64)))
    }

    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(AsyncPublisher::failing(FlowError::Failed(
            "source unavailable".into(),
        ))))
    }
}

/// A compliant publisher that can only ever produce a single element.
pub struct SingleElementFixture;

impl PublisherFixture<i64> for SingleElementFixture {
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(RangePublisher::integers(0, elements.min(1))))
    }

    fn capabilities(&self) -> PublisherCapabilities {
        PublisherCapabilities::bounded(1)
    }
}

/// A fixture that forgets to build anything.
pub struct EmptyFixture;

impl PublisherFixture<i64> for EmptyFixture {
    fn create_publisher(&self, _elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        None
    }
}

/// How a [`FaultyPublisher`] misbehaves.
#[derive(Clone, Copy)]
pub enum Fault {
    /// Emits one element more than requested.
    Overproduce,
    /// Silently ignores `request(n)` for `n <= 0`.
    IgnoreNonPositive,
    /// Accepts an absent subscriber.
    AcceptAbsent,
}

pub struct FaultyFixture(pub Fault);

impl PublisherFixture<i64> for FaultyFixture {
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(FaultyPublisher {
            fault: self.0,
            elements,
        }))
    }
}

pub struct FaultyPublisher {
    fault: Fault,
    elements: u64,
}

impl Publisher<i64> for FaultyPublisher {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<i64>>>) -> Result<(), FlowError> {
        let Some(subscriber) = subscriber else {
            return match self.fault {
                Fault::AcceptAbsent => Ok(()),
                _ => Err(FlowError::absent_subscriber()),
            };
        };
        let subscription = Arc::new(FaultySubscription {
            fault: self.fault,
            subscriber: Mutex::new(Some(Arc::clone(&subscriber))),
            remaining: Mutex::new(self.elements),
            next: Mutex::new(0),
        });
        subscriber.on_subscribe(subscription);
        Ok(())
    }
}

struct FaultySubscription {
    fault: Fault,
    subscriber: Mutex<Option<Arc<dyn Subscriber<i64>>>>,
    remaining: Mutex<u64>,
    next: Mutex<i64>,
}

impl Subscription for FaultySubscription {
    fn request(&self, n: i64) {
        let Some(subscriber) = self.subscriber.lock().clone() else {
            return;
        };
        if n <= 0 {
            if !matches!(self.fault, Fault::IgnoreNonPositive) {
                self.subscriber.lock().take();
                subscriber.on_error(FlowError::non_positive_request(n));
            }
            return;
        }
        let extra = matches!(self.fault, Fault::Overproduce) as i64;
        for _ in 0..n.saturating_add(extra) {
            let element = {
                let mut remaining = self.remaining.lock();
                if *remaining == 0 {
                    break;
                }
                *remaining -= 1;
                let mut next = self.next.lock();
                *next += 1;
                *next - 1
            };
            subscriber.on_next(element);
        }
    }

    fn cancel(&self) {
        self.subscriber.lock().take();
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// How a [`ProbedSubscriber`] behaves beyond reporting to its probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Asks for one more element after each `on_next`.
    Compliant,
    /// Never asks for anything on its own.
    Stall,
    /// Cancels its subscription from inside `on_complete`.
    CancelOnComplete,
    /// Calls `request(1)` and `cancel()` from another thread shortly after
    /// either terminal signal.
    LateCallsAfterTerminal,
}

/// Reports to its probe; requests on its own only when compliant.
pub struct ProbedSubscriber {
    probe: WhiteboxProbe<i64>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    behaviour: Behaviour,
}

impl ProbedSubscriber {
    pub fn new(probe: WhiteboxProbe<i64>, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            probe,
            subscription: Mutex::new(None),
            behaviour,
        })
    }

    fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.lock().clone()
    }
}

impl Subscriber<i64> for ProbedSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let mut current = self.subscription.lock();
        if current.is_some() {
            drop(current);
            subscription.cancel();
            return;
        }
        *current = Some(Arc::clone(&subscription));
        drop(current);
        self.probe
            .register_on_subscribe(SubscriptionPuppet::new(subscription));
    }

    fn on_next(&self, element: i64) {
        self.probe.register_on_next(element);
        if self.behaviour == Behaviour::Compliant {
            if let Some(subscription) = self.subscription() {
                subscription.request(1);
            }
        }
    }

    fn on_error(&self, error: FlowError) {
        if self.behaviour == Behaviour::LateCallsAfterTerminal {
            late_calls(self.subscription());
        }
        self.probe.register_on_error(error);
    }

    fn on_complete(&self) {
        match self.behaviour {
            Behaviour::CancelOnComplete => {
                if let Some(subscription) = self.subscription() {
                    subscription.cancel();
                }
            }
            Behaviour::LateCallsAfterTerminal => late_calls(self.subscription()),
            Behaviour::Compliant | Behaviour::Stall => {}
        }
        self.probe.register_on_complete();
    }
}

/// Touch `subscription` from a fresh thread 5 ms from now.
fn late_calls(subscription: Option<Arc<dyn Subscription>>) {
    let Some(subscription) = subscription else {
        return;
    };
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(5));
        subscription.request(1);
        subscription.cancel();
    });
}

/// Whitebox fixture over a [`ProbedSubscriber`] with the given behaviour.
pub struct WhiteboxFixture(pub Behaviour);

impl WhiteboxSubscriberFixture<i64> for WhiteboxFixture {
    fn create_subscriber(&self, probe: WhiteboxProbe<i64>) -> Option<Arc<dyn Subscriber<i64>>> {
        Some(ProbedSubscriber::new(probe, self.0))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64 * 10
    }
}

/// Never tells the probe anything.
pub struct SilentSubscriber;

impl Subscriber<i64> for SilentSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(1);
    }
    fn on_next(&self, _element: i64) {}
    fn on_error(&self, _error: FlowError) {}
    fn on_complete(&self) {}
}

pub struct UnregisteredFixture;

impl WhiteboxSubscriberFixture<i64> for UnregisteredFixture {
    fn create_subscriber(&self, _probe: WhiteboxProbe<i64>) -> Option<Arc<dyn Subscriber<i64>>> {
        Some(Arc::new(SilentSubscriber))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64
    }
}

/// Requests one element at a time and refuses a second subscription.
#[derive(Default)]
pub struct OneByOneSubscriber {
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
}

impl Subscriber<i64> for OneByOneSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let mut current = self.subscription.lock();
        if current.is_some() {
            drop(current);
            subscription.cancel();
            return;
        }
        *current = Some(Arc::clone(&subscription));
        drop(current);
        subscription.request(1);
    }

    fn on_next(&self, _element: i64) {
        if let Some(subscription) = self.subscription.lock().clone() {
            subscription.request(1);
        }
    }

    fn on_error(&self, _error: FlowError) {
        self.subscription.lock().take();
    }

    fn on_complete(&self) {
        self.subscription.lock().take();
    }
}

pub struct BlackboxFixture {
    pub with_helper: bool,
}

impl BlackboxSubscriberFixture<i64> for BlackboxFixture {
    fn create_subscriber(&self) -> Option<Arc<dyn Subscriber<i64>>> {
        Some(Arc::new(OneByOneSubscriber::default()))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64
    }

    fn create_helper_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<i64>>> {
        self.with_helper
            .then(|| Arc::new(AsyncPublisher::generate(elements, |id| id as i64)) as Arc<dyn Publisher<i64>>)
    }
}

/// Requests zero: always a protocol violation.
pub struct ZeroRequestSubscriber;

impl Subscriber<i64> for ZeroRequestSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        subscription.request(0);
    }
    fn on_next(&self, _element: i64) {}
    fn on_error(&self, _error: FlowError) {}
    fn on_complete(&self) {}
}

pub struct ZeroRequestFixture;

impl BlackboxSubscriberFixture<i64> for ZeroRequestFixture {
    fn create_subscriber(&self) -> Option<Arc<dyn Subscriber<i64>>> {
        Some(Arc::new(ZeroRequestSubscriber))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64
    }
}

/// Requests like [`OneByOneSubscriber`], but touches its subscription from
/// another thread shortly after either terminal signal.
#[derive(Default)]
pub struct LateCallsSubscriber {
    inner: OneByOneSubscriber,
}

impl Subscriber<i64> for LateCallsSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&self, element: i64) {
        self.inner.on_next(element);
    }

    fn on_error(&self, error: FlowError) {
        late_calls(self.inner.subscription.lock().clone());
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        late_calls(self.inner.subscription.lock().clone());
        self.inner.on_complete();
    }
}

pub struct LateCallsFixture;

impl BlackboxSubscriberFixture<i64> for LateCallsFixture {
    fn create_subscriber(&self) -> Option<Arc<dyn Subscriber<i64>>> {
        Some(Arc::new(LateCallsSubscriber::default()))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

enum Terminal {
    Completed,
    Failed(FlowError),
}

struct ProcessorState<T> {
    upstream: Option<Arc<dyn Subscription>>,
    upstream_seen: bool,
    downstream: Option<Arc<dyn Subscriber<T>>>,
    downstream_seen: bool,
    queue: VecDeque<T>,
    demand: u64,
    terminal: Option<Terminal>,
    finished: bool,
    cancelled: bool,
    draining: bool,
}

enum Step<T> {
    Next(Arc<dyn Subscriber<T>>, T, Option<Arc<dyn Subscription>>),
    Error(Arc<dyn Subscriber<T>>, FlowError),
    Complete(Arc<dyn Subscriber<T>>),
    Idle,
}

/// Identity processor with a prefetching buffer and a single downstream.
///
/// Requests `buffer_size` upstream on subscription and one more for each
/// element handed downstream. Failures skip the buffer.
pub struct BufferedProcessor<T> {
    me: Weak<Self>,
    buffer_size: usize,
    state: Mutex<ProcessorState<T>>,
}

impl<T: Send + 'static> BufferedProcessor<T> {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            buffer_size,
            state: Mutex::new(ProcessorState {
                upstream: None,
                upstream_seen: false,
                downstream: None,
                downstream_seen: false,
                queue: VecDeque::new(),
                demand: 0,
                terminal: None,
                finished: false,
                cancelled: false,
                draining: false,
            }),
        })
    }

    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let step = {
                let mut state = self.state.lock();
                let step = Self::next_step(&mut state);
                if matches!(step, Step::Idle) {
                    state.draining = false;
                }
                step
            };
            match step {
                Step::Next(downstream, element, upstream) => {
                    downstream.on_next(element);
                    if let Some(upstream) = upstream {
                        upstream.request(1);
                    }
                }
                Step::Error(downstream, error) => downstream.on_error(error),
                Step::Complete(downstream) => downstream.on_complete(),
                Step::Idle => return,
            }
        }
    }

    fn next_step(state: &mut ProcessorState<T>) -> Step<T> {
        let Some(downstream) = state.downstream.clone() else {
            return Step::Idle;
        };
        if matches!(state.terminal, Some(Terminal::Failed(_))) {
            if let Some(Terminal::Failed(error)) = state.terminal.take() {
                state.finished = true;
                state.downstream = None;
                return Step::Error(downstream, error);
            }
        }
        if state.demand > 0 {
            if let Some(element) = state.queue.pop_front() {
                if state.demand != UNBOUNDED_DEMAND {
                    state.demand -= 1;
                }
                return Step::Next(downstream, element, state.upstream.clone());
            }
        }
        if state.queue.is_empty() && matches!(state.terminal, Some(Terminal::Completed)) {
            state.terminal = None;
            state.finished = true;
            state.downstream = None;
            return Step::Complete(downstream);
        }
        Step::Idle
    }

    fn fail(&self, error: FlowError) {
        let upstream = {
            let mut state = self.state.lock();
            // A failure overtakes a completion still waiting behind the queue.
            if state.finished || matches!(state.terminal, Some(Terminal::Failed(_))) {
                return;
            }
            state.queue.clear();
            state.terminal = Some(Terminal::Failed(error));
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
        self.drain();
    }

    fn request(&self, n: i64) {
        if n <= 0 {
            self.fail(FlowError::non_positive_request(n));
            return;
        }
        {
            let mut state = self.state.lock();
            state.demand = add_demand(state.demand, n);
        }
        self.drain();
    }

    fn cancel(&self) {
        let upstream = {
            let mut state = self.state.lock();
            state.cancelled = true;
            state.downstream = None;
            state.queue.clear();
            state.upstream.take()
        };
        if let Some(upstream) = upstream {
            upstream.cancel();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for BufferedProcessor<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut state = self.state.lock();
            if state.upstream_seen || state.cancelled {
                drop(state);
                subscription.cancel();
                return;
            }
            state.upstream_seen = true;
            state.upstream = Some(Arc::clone(&subscription));
        }
        subscription.request(self.buffer_size as i64);
    }

    fn on_next(&self, element: T) {
        {
            let mut state = self.state.lock();
            if state.cancelled || state.finished || state.terminal.is_some() {
                return;
            }
            state.queue.push_back(element);
        }
        self.drain();
    }

    fn on_error(&self, error: FlowError) {
        {
            let mut state = self.state.lock();
            state.upstream = None;
        }
        self.fail(error);
    }

    fn on_complete(&self) {
        {
            let mut state = self.state.lock();
            if state.finished || state.terminal.is_some() {
                return;
            }
            state.upstream = None;
            state.terminal = Some(Terminal::Completed);
        }
        self.drain();
    }
}

impl<T: Send + 'static> Publisher<T> for BufferedProcessor<T> {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError> {
        let subscriber = subscriber.ok_or_else(FlowError::absent_subscriber)?;
        let first = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.downstream_seen, true)
        };
        if !first {
            subscriber.on_subscribe(Arc::new(Refused));
            subscriber.on_error(FlowError::Failed("processor serves a single subscriber".into()));
            return Ok(());
        }
        subscriber.on_subscribe(Arc::new(ProcessorSubscription {
            processor: self.me.clone(),
        }));
        {
            let mut state = self.state.lock();
            if state.cancelled {
                return Ok(());
            }
            state.downstream = Some(subscriber);
        }
        self.drain();
        Ok(())
    }
}

struct ProcessorSubscription<T> {
    processor: Weak<BufferedProcessor<T>>,
}

impl<T: Send + 'static> Subscription for ProcessorSubscription<T> {
    fn request(&self, n: i64) {
        if let Some(processor) = self.processor.upgrade() {
            processor.request(n);
        }
    }

    fn cancel(&self) {
        if let Some(processor) = self.processor.upgrade() {
            processor.cancel();
        }
    }
}

struct Refused;

impl Subscription for Refused {
    fn request(&self, _n: i64) {}
    fn cancel(&self) {}
}

pub struct ProcessorFixture;

impl IdentityProcessorFixture<i64> for ProcessorFixture {
    fn create_identity_processor(&self, buffer_size: usize) -> Option<ProcessorHandle<i64>> {
        Some(ProcessorHandle::new(BufferedProcessor::<i64>::new(buffer_size)))
    }

    fn create_element(&self, id: u64) -> i64 {
        id as i64
    }

    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<i64>>> {
        Some(Arc::new(AsyncPublisher::failing(FlowError::Failed(
            "processor failed".into(),
        ))))
    }
}
