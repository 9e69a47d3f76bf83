//! Identity processor verification.
//!
//! A processor is checked three ways: its publisher side with every
//! publisher case (fed by an [`AsyncPublisher`]), its subscriber side with
//! every whitebox case (drained by a forwarder that registers with the
//! probe), and a handful of cases about the two sides together.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use streamcheck_flow::{AsyncPublisher, FlowError, Publisher, Subscriber, Subscription};
use streamcheck_recorder::{RuleId, TimeoutConfig, VerificationError};

use crate::capability::{require_subscribers, PublisherCapabilities};
use crate::classify::{CaseResult, CaseStop, TestCase};
use crate::context::CaseContext;
use crate::fixture::{
    IdentityProcessorFixture, ProcessorHandle, PublisherFixture, WhiteboxSubscriberFixture,
};
use crate::probe::{ManualSubscriber, SubscriptionPuppet, WhiteboxProbe};
use crate::publisher::PublisherVerification;
use crate::runner::{self, SuiteReport, TestReport};
use crate::stage::ManualPublisher;
use crate::subscriber::{await_demand, WhiteboxSubscriberVerification};
use crate::Element;

const HARNESS: RuleId = RuleId::Harness;

fn create_processor<T>(
    fixture: &dyn IdentityProcessorFixture<T>,
) -> Result<ProcessorHandle<T>, VerificationError> {
    fixture
        .create_identity_processor(fixture.buffer_size())
        .ok_or_else(|| VerificationError::misuse("fixture returned no processor"))
}

type Upstreams = Arc<Mutex<Vec<Weak<dyn Subscription>>>>;

/// The processor's publisher side, fed by a harness-owned upstream.
///
/// Upstreams still open when the adapter is dropped are cancelled, so a
/// processor no case ever subscribed to does not keep a worker parked.
struct ProcessorAsPublisher<T> {
    fixture: Arc<dyn IdentityProcessorFixture<T>>,
    upstreams: Upstreams,
}

impl<T> ProcessorAsPublisher<T> {
    fn new(fixture: Arc<dyn IdentityProcessorFixture<T>>) -> Self {
        Self {
            fixture,
            upstreams: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Drop for ProcessorAsPublisher<T> {
    fn drop(&mut self) {
        let open: Vec<_> = self
            .upstreams
            .lock()
            .drain(..)
            .filter_map(|upstream| upstream.upgrade())
            .collect();
        if !open.is_empty() {
            tracing::debug!(count = open.len(), "cancelling processor upstreams");
        }
        for upstream in open {
            upstream.cancel();
        }
    }
}

impl<T: Element> PublisherFixture<T> for ProcessorAsPublisher<T> {
    fn create_publisher(&self, elements: u64) -> Option<Arc<dyn Publisher<T>>> {
        let processor = self
            .fixture
            .create_identity_processor(self.fixture.buffer_size())?;
        let fixture = Arc::clone(&self.fixture);
        let upstream = AsyncPublisher::generate(elements, move |id| fixture.create_element(id));
        let tap: Arc<dyn Subscriber<T>> = Arc::new(UpstreamTap {
            target: processor.subscriber(),
            upstreams: Arc::clone(&self.upstreams),
        });
        upstream.subscribe(Some(tap)).ok()?;
        Some(processor.publisher())
    }

    fn create_failed_publisher(&self) -> Option<Arc<dyn Publisher<T>>> {
        if let Some(failed) = self.fixture.create_failed_publisher() {
            return Some(failed);
        }
        let processor = self
            .fixture
            .create_identity_processor(self.fixture.buffer_size())?;
        let upstream = AsyncPublisher::<T>::failing(FlowError::Failed("upstream failure".into()));
        upstream.subscribe(Some(processor.subscriber())).ok()?;
        Some(processor.publisher())
    }

    fn capabilities(&self) -> PublisherCapabilities {
        self.fixture.capabilities()
    }
}

/// The processor's subscriber side; its output is drained into the probe.
struct ProcessorAsSubscriber<T> {
    fixture: Arc<dyn IdentityProcessorFixture<T>>,
}

impl<T: Element> WhiteboxSubscriberFixture<T> for ProcessorAsSubscriber<T> {
    fn create_subscriber(&self, probe: WhiteboxProbe<T>) -> Option<Arc<dyn Subscriber<T>>> {
        let processor = self
            .fixture
            .create_identity_processor(self.fixture.buffer_size())?;
        let forwarder: Arc<dyn Subscriber<T>> = Arc::new(Forwarder { probe });
        processor.publisher().subscribe(Some(forwarder)).ok()?;
        Some(processor.subscriber())
    }

    fn create_element(&self, id: u64) -> T {
        self.fixture.create_element(id)
    }
}

/// Passes everything through to the processor, remembering the upstream
/// subscription it was given.
struct UpstreamTap<T> {
    target: Arc<dyn Subscriber<T>>,
    upstreams: Upstreams,
}

impl<T: Element> Subscriber<T> for UpstreamTap<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        {
            let mut upstreams = self.upstreams.lock();
            upstreams.retain(|upstream| upstream.strong_count() > 0);
            upstreams.push(Arc::downgrade(&subscription));
        }
        self.target.on_subscribe(subscription);
    }

    fn on_next(&self, element: T) {
        self.target.on_next(element);
    }

    fn on_error(&self, error: FlowError) {
        self.target.on_error(error);
    }

    fn on_complete(&self) {
        self.target.on_complete();
    }
}

/// Downstream of a processor under whitebox test. Demand comes only from
/// the puppet it registers.
struct Forwarder<T> {
    probe: WhiteboxProbe<T>,
}

impl<T: Element> Subscriber<T> for Forwarder<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.probe
            .register_on_subscribe(SubscriptionPuppet::new(subscription));
    }

    fn on_next(&self, element: T) {
        self.probe.register_on_next(element);
    }

    fn on_error(&self, error: FlowError) {
        self.probe.register_on_error(error);
    }

    fn on_complete(&self) {
        self.probe.register_on_complete();
    }
}

pub struct IdentityProcessorVerification<T> {
    fixture: Arc<dyn IdentityProcessorFixture<T>>,
    config: TimeoutConfig,
    publisher: PublisherVerification<T>,
    subscriber: WhiteboxSubscriberVerification<T>,
}

impl<T: Element> IdentityProcessorVerification<T> {
    pub fn new(fixture: impl IdentityProcessorFixture<T> + 'static, config: TimeoutConfig) -> Self {
        let fixture: Arc<dyn IdentityProcessorFixture<T>> = Arc::new(fixture);
        Self {
            publisher: PublisherVerification::from_arc(
                Arc::new(ProcessorAsPublisher::new(Arc::clone(&fixture))),
                config,
            ),
            subscriber: WhiteboxSubscriberVerification::from_arc(
                Arc::new(ProcessorAsSubscriber {
                    fixture: Arc::clone(&fixture),
                }),
                config,
            ),
            fixture,
            config,
        }
    }

    pub fn publisher_verification(&self) -> &PublisherVerification<T> {
        &self.publisher
    }

    pub fn subscriber_verification(&self) -> &WhiteboxSubscriberVerification<T> {
        &self.subscriber
    }

    /// Cases about the processor as a whole; the delegated publisher and
    /// subscriber cases are not listed here.
    pub fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::required(
                HARNESS,
                "mustPassElementsThroughUnchanged",
                Self::passes_elements_unchanged,
            ),
            TestCase::required(
                HARNESS,
                "mustNotStallWhenDemandPrecedesInput",
                Self::no_stall_when_demand_first,
            ),
            TestCase::required(
                RuleId::spec(3, 12),
                "mustPropagateCancellationUpstream",
                Self::propagates_cancel,
            ),
            TestCase::required(
                RuleId::spec(1, 4),
                "mustPropagateUpstreamFailureDownstream",
                Self::propagates_failure,
            ),
            TestCase::required(
                RuleId::spec(1, 4),
                "mustCallOnErrorOnAllItsSubscribersIfItEncountersANonRecoverableError",
                Self::fails_all_subscribers,
            ),
        ]
    }

    /// Publisher-side, subscriber-side and combined cases in one report.
    pub fn run_all(&self) -> SuiteReport {
        let mut report = self.publisher.run_suite("processor-publisher");
        report.merge(self.subscriber.run_suite("processor-subscriber"));
        report.merge(runner::run_cases(
            "processor",
            self,
            &Self::cases(),
            self.config,
        ));
        report
    }

    pub fn run(&self, name: &str) -> Option<TestReport> {
        runner::run_named("processor", self, &Self::cases(), name, self.config)
            .or_else(|| self.publisher.run(name))
            .or_else(|| self.subscriber.run(name))
    }

    /// Processor between a manual upstream and one manual downstream.
    fn wire(
        &self,
        ctx: &CaseContext,
    ) -> Result<(Arc<ManualPublisher<T>>, Arc<ManualSubscriber<T>>), CaseStop> {
        let processor = create_processor(self.fixture.as_ref())?;
        let downstream = self.attach(ctx, &processor)?;
        let upstream = ManualPublisher::new(ctx);
        upstream
            .subscribe(Some(processor.subscriber()))
            .map_err(|err| VerificationError::misuse(format!("upstream stage: {err}")))?;
        Ok((upstream, downstream))
    }

    fn attach(
        &self,
        ctx: &CaseContext,
        processor: &ProcessorHandle<T>,
    ) -> Result<Arc<ManualSubscriber<T>>, CaseStop> {
        let downstream = ManualSubscriber::new(ctx);
        processor
            .publisher()
            .subscribe(Some(downstream.clone() as Arc<dyn Subscriber<T>>))
            .map_err(|err| {
                VerificationError::violation(
                    RuleId::spec(1, 9),
                    format!("processor rejected a subscriber: {err}"),
                )
            })?;
        downstream.expect_subscribed(RuleId::spec(1, 9))?;
        Ok(downstream)
    }

    /// Send elements `ids` through, never exceeding the processor's upstream
    /// demand, and expect each one downstream unchanged.
    fn relay(
        &self,
        upstream: &ManualPublisher<T>,
        downstream: &ManualSubscriber<T>,
        ids: std::ops::Range<u64>,
    ) -> CaseResult {
        let mut granted = 0u64;
        for id in ids {
            if granted == 0 {
                granted = await_demand(upstream, 1, HARNESS)?;
            }
            let element = self.fixture.create_element(id);
            upstream.send_next(element.clone())?;
            granted -= 1;
            downstream.expect_element_eq(HARNESS, &element)?;
        }
        Ok(())
    }

    fn passes_elements_unchanged(&self, ctx: &CaseContext) -> CaseResult {
        let (upstream, downstream) = self.wire(ctx)?;
        downstream.request(3);
        self.relay(&upstream, &downstream, 0..3)?;
        upstream.send_completion()?;
        downstream.expect_completion(HARNESS)?;
        Ok(())
    }

    fn no_stall_when_demand_first(&self, ctx: &CaseContext) -> CaseResult {
        let processor = create_processor(self.fixture.as_ref())?;
        let downstream = self.attach(ctx, &processor)?;
        downstream.request(4);

        let upstream = ManualPublisher::new(ctx);
        upstream
            .subscribe(Some(processor.subscriber()))
            .map_err(|err| VerificationError::misuse(format!("upstream stage: {err}")))?;
        self.relay(&upstream, &downstream, 0..4)
    }

    fn propagates_cancel(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 12);
        let (upstream, downstream) = self.wire(ctx)?;
        downstream.request(1);
        downstream.cancel();
        upstream.expect_cancel(rule)?;
        Ok(())
    }

    fn propagates_failure(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 4);
        let (upstream, downstream) = self.wire(ctx)?;
        downstream.request(1);
        upstream.send_error(FlowError::Failed("upstream failure".into()))?;
        downstream.expect_error(rule)?;
        downstream.expect_none(rule)?;
        Ok(())
    }

    fn fails_all_subscribers(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 4);
        require_subscribers(self.fixture.max_supported_subscribers(), 2)?;
        let processor = create_processor(self.fixture.as_ref())?;
        let first = self.attach(ctx, &processor)?;
        let second = self.attach(ctx, &processor)?;
        let upstream = ManualPublisher::new(ctx);
        upstream
            .subscribe(Some(processor.subscriber()))
            .map_err(|err| VerificationError::misuse(format!("upstream stage: {err}")))?;

        first.request(1);
        second.request(1);
        upstream.send_error(FlowError::Failed("upstream failure".into()))?;
        first.expect_error(rule)?;
        second.expect_error(rule)?;
        Ok(())
    }
}
