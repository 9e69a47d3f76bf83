//! A publisher under the harness's manual control, used to drive subscribers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use streamcheck_flow::{FlowError, Publisher, Subscriber, Subscription};
use streamcheck_recorder::{OnceSlot, RuleId, Signal, SignalRecorder, VerificationError};

use crate::context::CaseContext;
use crate::probe::TerminalTracker;
use crate::Element;

struct StageShared<T> {
    ctx: CaseContext,
    upstream: SignalRecorder<T>,
    subscriber: OnceSlot<Arc<dyn Subscriber<T>>>,
    /// Elements handed out synchronously from inside `request`.
    preloaded: Mutex<VecDeque<T>>,
    reentrant: bool,
    terminal: TerminalTracker,
}

/// Accepts one subscriber and emits only what the case tells it to.
///
/// Every `request`/`cancel` the subscriber makes is recorded; a reentrant
/// stage additionally answers each `request(n)` by delivering up to `n`
/// preloaded elements on the requesting thread.
pub struct ManualPublisher<T> {
    shared: Arc<StageShared<T>>,
}

impl<T: Element> ManualPublisher<T> {
    pub fn new(ctx: &CaseContext) -> Arc<Self> {
        Self::build(ctx, VecDeque::new(), false)
    }

    pub fn reentrant(ctx: &CaseContext, elements: Vec<T>) -> Arc<Self> {
        Self::build(ctx, elements.into(), true)
    }

    fn build(ctx: &CaseContext, preloaded: VecDeque<T>, reentrant: bool) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(StageShared {
                ctx: ctx.clone(),
                upstream: ctx.recorder("manual-publisher"),
                subscriber: OnceSlot::new(),
                preloaded: Mutex::new(preloaded),
                reentrant,
                terminal: TerminalTracker::default(),
            }),
        })
    }

    /// The subscriber, once one has subscribed.
    pub fn subscriber(&self) -> Result<Arc<dyn Subscriber<T>>, VerificationError> {
        self.shared
            .subscriber
            .wait(self.shared.ctx.timeout(), RuleId::Harness, "a subscriber")
    }

    pub fn send_next(&self, element: T) -> Result<(), VerificationError> {
        self.subscriber()?.on_next(element);
        Ok(())
    }

    pub fn send_completion(&self) -> Result<(), VerificationError> {
        let subscriber = self.subscriber()?;
        let _inside = self.shared.terminal.enter();
        subscriber.on_complete();
        Ok(())
    }

    pub fn send_error(&self, error: FlowError) -> Result<(), VerificationError> {
        let subscriber = self.subscriber()?;
        let _inside = self.shared.terminal.enter();
        subscriber.on_error(error);
        Ok(())
    }

    /// Calls the subscriber made back into its subscription.
    pub fn upstream(&self) -> &SignalRecorder<T> {
        &self.shared.upstream
    }

    pub fn expect_request(&self, rule: RuleId) -> Result<i64, VerificationError> {
        self.shared.upstream.expect_demand(self.shared.ctx.timeout(), rule)
    }

    /// Wait for `cancel()`, ignoring requests that precede it.
    pub fn expect_cancel(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.shared.upstream.expect_cancel(self.shared.ctx.timeout(), rule)
    }

    /// Discard upstream calls made so far, including any still arriving
    /// within one silence window.
    pub fn settle_upstream(&self) {
        // Every signal is allowed, so this cannot fail.
        let _ = self.shared.upstream.expect_no_signal_except(
            self.shared.ctx.no_signal_window(),
            RuleId::Harness,
            |_| true,
        );
    }

    pub fn expect_no_upstream_signal(&self, rule: RuleId) -> Result<(), VerificationError> {
        self.shared
            .upstream
            .expect_no_signal(self.shared.ctx.no_signal_window(), rule)
    }
}

impl<T: Element> Publisher<T> for ManualPublisher<T> {
    fn subscribe(&self, subscriber: Option<Arc<dyn Subscriber<T>>>) -> Result<(), FlowError> {
        let subscriber = subscriber.ok_or_else(FlowError::absent_subscriber)?;
        if self.shared.subscriber.set(Arc::clone(&subscriber)).is_err() {
            return Err(FlowError::Failed(
                "manual publisher accepts a single subscriber".into(),
            ));
        }
        subscriber.on_subscribe(Arc::new(ManualSubscription {
            shared: Arc::downgrade(&self.shared),
        }));
        Ok(())
    }
}

impl<T> fmt::Debug for ManualPublisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualPublisher")
            .field("upstream", &self.shared.upstream)
            .field("reentrant", &self.shared.reentrant)
            .finish()
    }
}

/// Holds the stage weakly so a subscriber keeping its subscription alive
/// does not keep the stage alive.
struct ManualSubscription<T> {
    shared: Weak<StageShared<T>>,
}

impl<T: Element> Subscription for ManualSubscription<T> {
    fn request(&self, n: i64) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if n <= 0 {
            shared.ctx.flop(VerificationError::violation(
                RuleId::spec(3, 9),
                format!("subscriber requested a non-positive amount ({n})"),
            ));
        }
        if shared.terminal.is_current() {
            shared.ctx.flop(VerificationError::violation(
                RuleId::spec(2, 3),
                format!("request({n}) called from within a terminal callback"),
            ));
        }
        shared.upstream.record(Signal::DemandRequested(n));

        if !shared.reentrant || n <= 0 {
            return;
        }
        let Some(subscriber) = shared.subscriber.get() else {
            return;
        };
        for _ in 0..n {
            let next = shared.preloaded.lock().pop_front();
            match next {
                Some(element) => subscriber.on_next(element),
                None => break,
            }
        }
    }

    fn cancel(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if shared.terminal.is_current() {
            shared.ctx.flop(VerificationError::violation(
                RuleId::spec(2, 3),
                "cancel() called from within a terminal callback",
            ));
        }
        shared.upstream.record(Signal::Cancelled);
    }
}
