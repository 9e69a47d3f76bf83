//! Harness-side participants: the manual subscriber that drives publishers,
//! the whitebox probe subscribers report into, and the puppets the harness
//! pulls to make a subscriber request or cancel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use streamcheck_flow::{FlowError, Publisher, Subscriber, Subscription};
use streamcheck_recorder::{OnceSlot, RuleId, Signal, SignalKind, SignalRecorder, VerificationError};

use crate::context::CaseContext;
use crate::Element;

const SPEC_1_01: RuleId = RuleId::spec(1, 1);
const SPEC_1_03: RuleId = RuleId::spec(1, 3);
const SPEC_1_07: RuleId = RuleId::spec(1, 7);
const SPEC_1_09: RuleId = RuleId::spec(1, 9);
const SPEC_2_03: RuleId = RuleId::spec(2, 3);
const SPEC_2_05: RuleId = RuleId::spec(2, 5);
const SPEC_3_03: RuleId = RuleId::spec(3, 3);
const SPEC_3_09: RuleId = RuleId::spec(3, 9);

/// Demand at or above this is unbounded and never decremented.
const UNBOUNDED_DEMAND: u64 = i64::MAX as u64;

/// Detects callbacks entered from two threads at once. Nested entry from
/// the owning thread (a synchronous `request` inside a callback) is allowed.
#[derive(Default)]
struct CallbackGuard {
    owner: Mutex<Option<(ThreadId, usize)>>,
}

struct Entered<'a> {
    guard: &'a CallbackGuard,
    concurrent: bool,
}

impl CallbackGuard {
    fn enter(&self) -> Entered<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        let concurrent = match owner.as_mut() {
            Some((thread, _)) if *thread != me => true,
            Some((_, depth)) => {
                *depth += 1;
                false
            }
            None => {
                *owner = Some((me, 1));
                false
            }
        };
        Entered {
            guard: self,
            concurrent,
        }
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        if self.concurrent {
            return;
        }
        let mut owner = self.guard.owner.lock();
        if let Some((_, depth)) = owner.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                *owner = None;
            }
        }
    }
}

/// Marks the thread currently inside `on_complete`/`on_error`, so calls
/// made back into the subscription from there can be flagged.
#[derive(Default)]
pub(crate) struct TerminalTracker {
    thread: Mutex<Option<ThreadId>>,
}

pub(crate) struct InTerminal<'a>(&'a TerminalTracker);

impl TerminalTracker {
    pub(crate) fn enter(&self) -> InTerminal<'_> {
        *self.thread.lock() = Some(thread::current().id());
        InTerminal(self)
    }

    pub(crate) fn is_current(&self) -> bool {
        *self.thread.lock() == Some(thread::current().id())
    }
}

impl Drop for InTerminal<'_> {
    fn drop(&mut self) {
        *self.0.thread.lock() = None;
    }
}

/// What a [`ManualSubscriber`] does on its own from inside callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reactions {
    /// Request this many right after `on_subscribe`.
    pub request_on_subscribe: Option<i64>,
    /// Request this many after every `on_next`.
    pub request_on_next: Option<i64>,
    /// Cancel once this many elements have arrived.
    pub cancel_after: Option<u64>,
    /// Flag `on_next` nested deeper than this on one thread.
    pub recursion_bound: Option<usize>,
}

#[derive(Default)]
struct SubscriberState {
    subscribed: bool,
    terminated: Option<SignalKind>,
    outstanding: u64,
    received: u64,
}

/// Subscriber driven step by step by the publisher driver.
///
/// Records every callback and checks ordering, demand and serialization on
/// the calling thread; violations go to the case's error sink.
pub struct ManualSubscriber<T> {
    ctx: CaseContext,
    recorder: SignalRecorder<T>,
    subscription: OnceSlot<Arc<dyn Subscription>>,
    state: Mutex<SubscriberState>,
    guard: CallbackGuard,
    /// `on_next` frames currently open, per calling thread.
    next_depth: Mutex<HashMap<ThreadId, usize>>,
    reactions: Reactions,
}

impl<T: Element> ManualSubscriber<T> {
    pub fn new(ctx: &CaseContext) -> Arc<Self> {
        Self::with_reactions(ctx, Reactions::default())
    }

    pub fn with_reactions(ctx: &CaseContext, reactions: Reactions) -> Arc<Self> {
        Arc::new(Self {
            ctx: ctx.clone(),
            recorder: ctx.recorder("manual-subscriber"),
            subscription: OnceSlot::new(),
            state: Mutex::new(SubscriberState::default()),
            guard: CallbackGuard::default(),
            next_depth: Mutex::new(HashMap::new()),
            reactions,
        })
    }

    pub fn recorder(&self) -> &SignalRecorder<T> {
        &self.recorder
    }

    pub fn subscription(&self) -> Option<Arc<dyn Subscription>> {
        self.subscription.get()
    }

    pub fn received(&self) -> u64 {
        self.state.lock().received
    }

    pub fn request(&self, n: i64) {
        let Some(subscription) = self.subscription.get() else {
            self.ctx
                .flop(VerificationError::misuse("request before a subscription was granted"));
            return;
        };
        if n > 0 {
            let mut state = self.state.lock();
            state.outstanding = state
                .outstanding
                .saturating_add(n as u64)
                .min(UNBOUNDED_DEMAND);
        }
        subscription.request(n);
    }

    pub fn cancel(&self) {
        if let Some(subscription) = self.subscription.get() {
            subscription.cancel();
        }
    }

    /// The first signal must be the subscription grant.
    pub fn expect_subscribed(&self, rule: RuleId) -> Result<Arc<dyn Subscription>, VerificationError> {
        self.recorder.expect_subscription(self.ctx.timeout(), rule)
    }

    pub fn next_element(&self, rule: RuleId) -> Result<T, VerificationError> {
        self.recorder.expect_element(self.ctx.timeout(), rule)
    }

    pub fn next_elements(&self, n: u64, rule: RuleId) -> Result<Vec<T>, VerificationError> {
        (0..n).map(|_| self.next_element(rule)).collect()
    }

    pub fn expect_element_eq(&self, rule: RuleId, expected: &T) -> Result<(), VerificationError> {
        self.recorder.expect_element_eq(self.ctx.timeout(), rule, expected)
    }

    pub fn expect_completion(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.recorder.expect_completion(self.ctx.timeout(), rule)
    }

    pub fn expect_error(&self, rule: RuleId) -> Result<FlowError, VerificationError> {
        self.recorder.expect_error(self.ctx.timeout(), rule)
    }

    pub fn expect_none(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.recorder.expect_no_signal(self.ctx.no_signal_window(), rule)
    }

    fn terminal(&self, kind: SignalKind) {
        let mut state = self.state.lock();
        if !state.subscribed {
            self.ctx.flop(VerificationError::violation(
                SPEC_1_09,
                format!("{kind} before onSubscribe"),
            ));
        }
        if let Some(previous) = state.terminated {
            self.ctx.flop(VerificationError::violation(
                SPEC_1_07,
                format!("{kind} after {previous}"),
            ));
        }
        state.terminated = Some(kind);
    }

    fn enter_next(&self) -> usize {
        let mut depths = self.next_depth.lock();
        let depth = depths.entry(thread::current().id()).or_insert(0);
        *depth += 1;
        *depth
    }

    fn leave_next(&self) {
        let mut depths = self.next_depth.lock();
        let id = thread::current().id();
        if let Some(depth) = depths.get_mut(&id) {
            *depth -= 1;
            if *depth == 0 {
                depths.remove(&id);
            }
        }
    }
}

impl<T: Element> Subscriber<T> for ManualSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let entered = self.guard.enter();
        if entered.concurrent {
            self.ctx.flop(VerificationError::violation(
                SPEC_1_03,
                "onSubscribe signalled concurrently with another callback",
            ));
        }
        {
            let mut state = self.state.lock();
            if state.subscribed {
                drop(state);
                self.ctx.flop(VerificationError::violation(
                    SPEC_1_09,
                    "onSubscribe signalled more than once",
                ));
                subscription.cancel();
                return;
            }
            state.subscribed = true;
        }
        if self.subscription.set(Arc::clone(&subscription)).is_err() {
            return;
        }
        let held = Arc::downgrade(&subscription);
        self.ctx.on_release(move || {
            if let Some(subscription) = held.upgrade() {
                subscription.cancel();
            }
        });
        self.recorder.record(Signal::SubscriptionGranted(subscription));
        if let Some(n) = self.reactions.request_on_subscribe {
            self.request(n);
        }
    }

    fn on_next(&self, element: T) {
        let entered = self.guard.enter();
        if entered.concurrent {
            self.ctx.flop(VerificationError::violation(
                SPEC_1_03,
                "onNext signalled concurrently with another callback",
            ));
        }
        let depth = self.enter_next();
        if let Some(bound) = self.reactions.recursion_bound {
            if depth > bound {
                self.ctx.flop(VerificationError::violation(
                    SPEC_3_03,
                    format!("request -> onNext recursion reached depth {depth}, bound is {bound}"),
                ));
            }
        }

        let received = {
            let mut state = self.state.lock();
            if !state.subscribed {
                self.ctx
                    .flop(VerificationError::violation(SPEC_1_09, "onNext before onSubscribe"));
            }
            if let Some(terminal) = state.terminated {
                self.ctx.flop(VerificationError::violation(
                    SPEC_1_07,
                    format!("onNext({element:?}) after {terminal}"),
                ));
            }
            if state.outstanding == 0 {
                self.ctx.flop(VerificationError::violation(
                    SPEC_1_01,
                    format!("onNext({element:?}) with no outstanding demand"),
                ));
            } else if state.outstanding < UNBOUNDED_DEMAND {
                state.outstanding -= 1;
            }
            state.received += 1;
            state.received
        };
        self.recorder.record(Signal::ElementDelivered(element));

        if self.reactions.cancel_after == Some(received) {
            self.cancel();
        } else if self.reactions.cancel_after.map_or(true, |limit| received < limit) {
            if let Some(n) = self.reactions.request_on_next {
                self.request(n);
            }
        }
        self.leave_next();
    }

    fn on_error(&self, error: FlowError) {
        let _entered = self.guard.enter();
        self.terminal(SignalKind::Failed);
        self.recorder.record(Signal::Failed(error));
    }

    fn on_complete(&self) {
        let _entered = self.guard.enter();
        self.terminal(SignalKind::Completed);
        self.recorder.record(Signal::Completed);
    }
}

impl<T> fmt::Debug for ManualSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualSubscriber")
            .field("recorder", &self.recorder)
            .field("reactions", &self.reactions)
            .finish()
    }
}

/// The handle a subscriber under whitebox test registers so the harness can
/// make it request or cancel.
pub trait SubscriberPuppet: Send + Sync {
    fn trigger_demand(&self, n: i64);
    fn signal_cancel(&self);
}

/// Puppet that passes straight through to a subscription. What most
/// subscribers register.
pub struct SubscriptionPuppet(Arc<dyn Subscription>);

impl SubscriptionPuppet {
    pub fn new(subscription: Arc<dyn Subscription>) -> Arc<Self> {
        Arc::new(Self(subscription))
    }
}

impl SubscriberPuppet for SubscriptionPuppet {
    fn trigger_demand(&self, n: i64) {
        self.0.request(n);
    }

    fn signal_cancel(&self) {
        self.0.cancel();
    }
}

/// Lets a registered puppet travel through the recorder as a granted
/// subscription.
struct PuppetSubscription(Arc<dyn SubscriberPuppet>);

impl Subscription for PuppetSubscription {
    fn request(&self, n: i64) {
        self.0.trigger_demand(n);
    }

    fn cancel(&self) {
        self.0.signal_cancel();
    }
}

struct ProbeInner<T> {
    ctx: CaseContext,
    recorder: SignalRecorder<T>,
    puppet: OnceSlot<Arc<dyn SubscriberPuppet>>,
    terminated: Mutex<Option<SignalKind>>,
}

/// Receives a whitebox subscriber's callbacks as it processes them.
pub struct WhiteboxProbe<T> {
    inner: Arc<ProbeInner<T>>,
}

impl<T> Clone for WhiteboxProbe<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> WhiteboxProbe<T> {
    pub fn new(ctx: &CaseContext) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                ctx: ctx.clone(),
                recorder: ctx.recorder("whitebox-probe"),
                puppet: OnceSlot::new(),
                terminated: Mutex::new(None),
            }),
        }
    }

    /// Call from `on_subscribe` with a puppet for the accepted subscription.
    pub fn register_on_subscribe(&self, puppet: Arc<dyn SubscriberPuppet>) {
        match self.inner.puppet.set(Arc::clone(&puppet)) {
            Ok(()) => {
                let held = Arc::downgrade(&puppet);
                self.inner.ctx.on_release(move || {
                    if let Some(puppet) = held.upgrade() {
                        puppet.signal_cancel();
                    }
                });
                self.inner
                    .recorder
                    .record(Signal::SubscriptionGranted(Arc::new(PuppetSubscription(puppet))));
            }
            Err(_) => self.inner.ctx.flop(VerificationError::violation(
                SPEC_2_05,
                "subscriber registered a second subscription with the probe",
            )),
        }
    }

    pub fn register_on_next(&self, element: T) {
        self.check_open("onNext");
        self.inner.recorder.record(Signal::ElementDelivered(element));
    }

    pub fn register_on_error(&self, error: FlowError) {
        self.check_open("onError");
        *self.inner.terminated.lock() = Some(SignalKind::Failed);
        self.inner.recorder.record(Signal::Failed(error));
    }

    pub fn register_on_complete(&self) {
        self.check_open("onComplete");
        *self.inner.terminated.lock() = Some(SignalKind::Completed);
        self.inner.recorder.record(Signal::Completed);
    }

    fn check_open(&self, what: &str) {
        if self.inner.puppet.get().is_none() {
            self.inner.ctx.flop(VerificationError::misuse(format!(
                "{what} registered with the probe before onSubscribe"
            )));
        }
        if let Some(terminal) = *self.inner.terminated.lock() {
            self.inner.ctx.flop(VerificationError::misuse(format!(
                "{what} registered with the probe after {terminal}"
            )));
        }
    }

    /// Wait for the subscriber to register, consuming the grant signal.
    pub fn expect_registration(&self) -> Result<Arc<dyn SubscriberPuppet>, VerificationError> {
        let puppet = self.inner.puppet.wait(
            self.inner.ctx.timeout(),
            RuleId::Harness,
            "puppet registration from onSubscribe",
        )?;
        self.inner
            .recorder
            .expect_subscription(self.inner.ctx.timeout(), RuleId::Harness)?;
        Ok(puppet)
    }

    pub fn recorder(&self) -> &SignalRecorder<T> {
        &self.inner.recorder
    }

    pub fn expect_next(&self, rule: RuleId) -> Result<T, VerificationError> {
        self.inner.recorder.expect_element(self.inner.ctx.timeout(), rule)
    }

    pub fn expect_next_eq(&self, rule: RuleId, expected: &T) -> Result<(), VerificationError> {
        self.inner
            .recorder
            .expect_element_eq(self.inner.ctx.timeout(), rule, expected)
    }

    pub fn expect_completion(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.inner.recorder.expect_completion(self.inner.ctx.timeout(), rule)
    }

    pub fn expect_error(&self, rule: RuleId) -> Result<FlowError, VerificationError> {
        self.inner.recorder.expect_error(self.inner.ctx.timeout(), rule)
    }

    pub fn expect_none(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.inner
            .recorder
            .expect_no_signal(self.inner.ctx.no_signal_window(), rule)
    }
}

impl<T> fmt::Debug for WhiteboxProbe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WhiteboxProbe")
            .field("recorder", &self.inner.recorder)
            .field("registered", &self.inner.puppet.get().is_some())
            .finish()
    }
}

/// Shared by the observing wrappers: what went down to the subscriber and
/// what came back up from it.
struct Observation<T> {
    ctx: CaseContext,
    delivered: SignalRecorder<T>,
    upstream: SignalRecorder<T>,
    terminal: TerminalTracker,
}

/// Wraps a helper publisher so a blackbox subscriber's traffic can be
/// watched from both directions without touching the subscriber.
pub struct ObservedPublisher<T> {
    inner: Arc<dyn Publisher<T>>,
    observation: Arc<Observation<T>>,
}

impl<T: Element> ObservedPublisher<T> {
    pub fn new(ctx: &CaseContext, inner: Arc<dyn Publisher<T>>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            observation: Arc::new(Observation {
                ctx: ctx.clone(),
                delivered: ctx.recorder("observed-downstream"),
                upstream: ctx.recorder("observed-upstream"),
                terminal: TerminalTracker::default(),
            }),
        })
    }

    /// Signals the publisher passed to the subscriber.
    pub fn delivered(&self) -> &SignalRecorder<T> {
        &self.observation.delivered
    }

    /// `request`/`cancel` calls the subscriber made.
    pub fn upstream(&self) -> &SignalRecorder<T> {
        &self.observation.upstream
    }
}

impl<T: Element> Publisher<T> for ObservedPublisher<T> {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError> {
        let Some(target) = subscriber else {
            return Err(FlowError::absent_subscriber());
        };
        let observing: Arc<dyn Subscriber<T>> = Arc::new(ObservingSubscriber {
            target,
            observation: Arc::clone(&self.observation),
        });
        self.inner.subscribe(Some(observing))
    }
}

struct ObservingSubscriber<T> {
    target: Arc<dyn Subscriber<T>>,
    observation: Arc<Observation<T>>,
}

impl<T: Element> Subscriber<T> for ObservingSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.observation
            .delivered
            .record(Signal::SubscriptionGranted(Arc::clone(&subscription)));
        let held = Arc::downgrade(&subscription);
        self.observation.ctx.on_release(move || {
            if let Some(subscription) = held.upgrade() {
                subscription.cancel();
            }
        });
        self.target.on_subscribe(Arc::new(ObservedSubscription {
            inner: subscription,
            observation: Arc::clone(&self.observation),
        }));
    }

    fn on_next(&self, element: T) {
        self.observation
            .delivered
            .record(Signal::ElementDelivered(element.clone()));
        self.target.on_next(element);
    }

    fn on_error(&self, error: FlowError) {
        self.observation.delivered.record(Signal::Failed(error.clone()));
        let _inside = self.observation.terminal.enter();
        self.target.on_error(error);
    }

    fn on_complete(&self) {
        self.observation.delivered.record(Signal::Completed);
        let _inside = self.observation.terminal.enter();
        self.target.on_complete();
    }
}

struct ObservedSubscription<T> {
    inner: Arc<dyn Subscription>,
    observation: Arc<Observation<T>>,
}

impl<T: Element> Subscription for ObservedSubscription<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.observation.ctx.flop(VerificationError::violation(
                SPEC_3_09,
                format!("subscriber requested a non-positive amount ({n})"),
            ));
        }
        if self.observation.terminal.is_current() {
            self.observation.ctx.flop(VerificationError::violation(
                SPEC_2_03,
                format!("request({n}) called from within a terminal callback"),
            ));
        }
        self.observation.upstream.record(Signal::DemandRequested(n));
        self.inner.request(n);
    }

    fn cancel(&self) {
        if self.observation.terminal.is_current() {
            self.observation.ctx.flop(VerificationError::violation(
                SPEC_2_03,
                "cancel() called from within a terminal callback",
            ));
        }
        self.observation.upstream.record(Signal::Cancelled);
        self.inner.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::time::Duration;
    use streamcheck_flow::RangePublisher;
    use streamcheck_recorder::TimeoutConfig;

    fn ctx() -> CaseContext {
        CaseContext::new(
            TimeoutConfig::default()
                .with_default_timeout(Duration::from_millis(500))
                .with_no_signal_timeout(Duration::from_millis(20)),
        )
    }

    #[test]
    fn test_manual_subscriber_sees_requested_elements() {
        let ctx = ctx();
        let publisher = RangePublisher::integers(0, 3);
        let sub = ManualSubscriber::<i64>::new(&ctx);
        publisher
            .subscribe(Some(sub.clone() as Arc<dyn Subscriber<i64>>))
            .unwrap();
        sub.expect_subscribed(RuleId::Harness).unwrap();
        sub.request(3);
        assert_eq!(sub.next_elements(3, RuleId::Harness).unwrap(), vec![0, 1, 2]);
        sub.expect_completion(RuleId::Harness).unwrap();
        assert!(ctx.verify_no_async_errors().is_ok());
    }

    #[test]
    fn test_overproduction_is_flagged() {
        let ctx = ctx();
        let sub = ManualSubscriber::<u8>::new(&ctx);
        sub.on_subscribe(Arc::new(NoopSubscription));
        sub.on_next(1);
        let err = ctx.verify_no_async_errors().unwrap_err();
        assert_eq!(err.rule(), SPEC_1_01);
    }

    #[test]
    fn test_next_after_complete_is_flagged() {
        let ctx = ctx();
        let sub = ManualSubscriber::<u8>::new(&ctx);
        sub.on_subscribe(Arc::new(NoopSubscription));
        sub.request(5);
        sub.on_complete();
        sub.on_next(1);
        let err = ctx.verify_no_async_errors().unwrap_err();
        assert_eq!(err.rule(), SPEC_1_07);
    }

    #[test]
    fn test_cancel_after_stops_requesting() {
        let ctx = ctx();
        let publisher = RangePublisher::integers(0, 100);
        let sub = ManualSubscriber::<i64>::with_reactions(
            &ctx,
            Reactions {
                request_on_subscribe: Some(1),
                request_on_next: Some(1),
                cancel_after: Some(4),
                recursion_bound: Some(1),
            },
        );
        publisher
            .subscribe(Some(sub.clone() as Arc<dyn Subscriber<i64>>))
            .unwrap();
        sub.expect_subscribed(RuleId::Harness).unwrap();
        assert_eq!(sub.next_elements(4, RuleId::Harness).unwrap(), vec![0, 1, 2, 3]);
        sub.expect_none(RuleId::Harness).unwrap();
        assert!(ctx.verify_no_async_errors().is_ok());
    }

    #[test]
    fn test_second_puppet_registration_is_flagged() {
        let ctx = ctx();
        let probe = WhiteboxProbe::<u8>::new(&ctx);
        probe.register_on_subscribe(SubscriptionPuppet::new(Arc::new(NoopSubscription)));
        probe.expect_registration().unwrap();
        probe.register_on_subscribe(SubscriptionPuppet::new(Arc::new(NoopSubscription)));
        assert_eq!(ctx.verify_no_async_errors().unwrap_err().rule(), SPEC_2_05);
    }

    #[test]
    fn test_missing_registration_times_out() {
        let probe = WhiteboxProbe::<u8>::new(&ctx());
        assert!(probe.expect_registration().err().unwrap().is_timeout());
    }

    #[test]
    fn test_recursion_depth_is_counted_per_thread() {
        let reactions = Reactions {
            request_on_subscribe: Some(1),
            request_on_next: Some(1),
            cancel_after: None,
            recursion_bound: Some(1),
        };

        let ctx = ctx();
        let sub = ManualSubscriber::<u8>::with_reactions(&ctx, reactions);
        sub.on_subscribe(EchoSubscription::attach(&sub, 2, false));
        let rules: Vec<RuleId> = ctx.errors().snapshot().iter().map(|e| e.rule()).collect();
        assert!(rules.contains(&SPEC_3_03), "{rules:?}");

        // Overlapping callbacks from different threads are a 1.03 problem,
        // not recursion.
        let ctx = self::ctx();
        let sub = ManualSubscriber::<u8>::with_reactions(&ctx, reactions);
        sub.on_subscribe(EchoSubscription::attach(&sub, 2, true));
        let rules: Vec<RuleId> = ctx.errors().snapshot().iter().map(|e| e.rule()).collect();
        assert!(rules.contains(&SPEC_1_03), "{rules:?}");
        assert!(!rules.contains(&SPEC_3_03), "{rules:?}");
    }

    struct NoopSubscription;

    /// Answers each `request` with one element until `left` runs out, either
    /// on the requesting thread or on a fresh one.
    struct EchoSubscription {
        target: Weak<ManualSubscriber<u8>>,
        left: Mutex<u8>,
        cross_thread: bool,
    }

    impl EchoSubscription {
        fn attach(sub: &Arc<ManualSubscriber<u8>>, left: u8, cross_thread: bool) -> Arc<Self> {
            Arc::new(Self {
                target: Arc::downgrade(sub),
                left: Mutex::new(left),
                cross_thread,
            })
        }
    }

    impl Subscription for EchoSubscription {
        fn request(&self, _n: i64) {
            let element = {
                let mut left = self.left.lock();
                if *left == 0 {
                    return;
                }
                *left -= 1;
                *left
            };
            let Some(target) = self.target.upgrade() else {
                return;
            };
            if self.cross_thread {
                thread::scope(|scope| {
                    scope.spawn(|| target.on_next(element));
                });
            } else {
                target.on_next(element);
            }
        }

        fn cancel(&self) {}
    }

    impl Subscription for NoopSubscription {
        fn request(&self, _n: i64) {}
        fn cancel(&self) {}
    }
}
