use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use streamcheck_flow::{FlowError, Publisher, Subscriber};
use streamcheck_recorder::{RuleId, Signal, TimeoutConfig, VerificationError};

use super::{await_demand, await_demand_or_cancel, untested_cases};
use crate::classify::{CaseResult, CaseStop, TestCase};
use crate::context::CaseContext;
use crate::fixture::WhiteboxSubscriberFixture;
use crate::probe::{SubscriberPuppet, WhiteboxProbe};
use crate::runner::{self, SuiteReport, TestReport};
use crate::stage::ManualPublisher;
use crate::Element;

const HARNESS: RuleId = RuleId::Harness;

pub struct WhiteboxSubscriberVerification<T> {
    fixture: Arc<dyn WhiteboxSubscriberFixture<T>>,
    config: TimeoutConfig,
}

/// One subscriber under test, subscribed to a manual publisher, with its
/// probe and registered puppet.
struct WhiteboxStage<T> {
    publisher: Arc<ManualPublisher<T>>,
    subscriber: Arc<dyn Subscriber<T>>,
    probe: WhiteboxProbe<T>,
    puppet: Arc<dyn SubscriberPuppet>,
    fixture: Arc<dyn WhiteboxSubscriberFixture<T>>,
    next_id: AtomicU64,
}

impl<T: Element> WhiteboxStage<T> {
    fn new(
        driver: &WhiteboxSubscriberVerification<T>,
        ctx: &CaseContext,
        publisher: Arc<ManualPublisher<T>>,
    ) -> Result<Self, CaseStop> {
        let probe = WhiteboxProbe::new(ctx);
        let subscriber = driver
            .fixture
            .create_subscriber(probe.clone())
            .ok_or_else(|| VerificationError::misuse("fixture returned no subscriber"))?;
        publisher
            .subscribe(Some(Arc::clone(&subscriber)))
            .map_err(|err| VerificationError::misuse(format!("stage rejected subscriber: {err}")))?;
        let puppet = probe.expect_registration()?;
        tracing::debug!("whitebox stage ready");
        Ok(Self {
            publisher,
            subscriber,
            probe,
            puppet,
            fixture: Arc::clone(&driver.fixture),
            next_id: AtomicU64::new(0),
        })
    }

    fn element(&self) -> T {
        self.fixture
            .create_element(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Send a fresh element and return what was sent.
    fn send_next(&self) -> Result<T, VerificationError> {
        let element = self.element();
        self.publisher.send_next(element.clone())?;
        Ok(element)
    }
}

impl<T: Element> WhiteboxSubscriberVerification<T> {
    pub fn new(fixture: impl WhiteboxSubscriberFixture<T> + 'static, config: TimeoutConfig) -> Self {
        Self::from_arc(Arc::new(fixture), config)
    }

    pub fn from_arc(fixture: Arc<dyn WhiteboxSubscriberFixture<T>>, config: TimeoutConfig) -> Self {
        Self { fixture, config }
    }

    pub fn cases() -> Vec<TestCase<Self>> {
        let mut cases = vec![
            TestCase::required(HARNESS, "exerciseWhiteboxHappyPath", Self::happy_path),
            TestCase::required(
                RuleId::spec(2, 1),
                "mustSignalDemandViaSubscriptionRequest",
                Self::signals_demand,
            ),
            TestCase::required(
                RuleId::spec(2, 1),
                "mustSignalFurtherDemandOrCancelAfterOnNext",
                Self::further_demand_after_on_next,
            ),
            TestCase::required(
                RuleId::spec(2, 3),
                "onCompleteMustNotCallAnyMethodsOnTheSubscriptionOrThePublisher",
                Self::quiet_on_complete,
            ),
            TestCase::required(
                RuleId::spec(2, 3),
                "onErrorMustNotCallAnyMethodsOnTheSubscriptionOrThePublisher",
                Self::quiet_on_error,
            ),
            TestCase::required(
                RuleId::spec(2, 5),
                "mustCallSubscriptionCancelIfItAlreadyHasAnSubscriptionAndReceivesAnotherOnSubscribeSignal",
                Self::cancels_second_subscription,
            ),
            TestCase::required(
                RuleId::spec(2, 6),
                "mustCallSubscriptionCancelWhenDirectedToStop",
                Self::cancels_when_directed,
            ),
            TestCase::required(
                RuleId::spec(2, 8),
                "mustBePreparedToReceiveOnNextSignalsAfterHavingCalledSubscriptionCancel",
                Self::tolerates_next_after_cancel,
            ),
            TestCase::required(
                RuleId::spec(2, 9),
                "mustBePreparedToReceiveAnOnCompleteSignalWithPrecedingRequestCall",
                Self::completion_after_request,
            ),
            TestCase::required(
                RuleId::spec(2, 9),
                "mustBePreparedToReceiveAnOnCompleteSignalWithoutPrecedingRequestCall",
                Self::completion_without_request,
            ),
            TestCase::required(
                RuleId::spec(2, 10),
                "mustBePreparedToReceiveAnOnErrorSignalWithPrecedingRequestCall",
                Self::error_after_request,
            ),
            TestCase::required(
                RuleId::spec(2, 10),
                "mustBePreparedToReceiveAnOnErrorSignalWithoutPrecedingRequestCall",
                Self::error_without_request,
            ),
            TestCase::required(
                RuleId::spec(3, 2),
                "mustBePreparedToReceiveOnNextReentrantWithRequest",
                Self::reentrant_on_next,
            ),
            TestCase::required(
                RuleId::spec(3, 8),
                "requestMustRegisterGivenNumberElementsToBeProduced",
                Self::request_registers_demand,
            ),
        ];
        cases.extend(untested_cases(false));
        cases
    }

    pub fn run_all(&self) -> SuiteReport {
        self.run_suite("whitebox-subscriber")
    }

    pub fn run_suite(&self, suite: &str) -> SuiteReport {
        runner::run_cases(suite, self, &Self::cases(), self.config)
    }

    pub fn run(&self, name: &str) -> Option<TestReport> {
        runner::run_named("whitebox-subscriber", self, &Self::cases(), name, self.config)
    }

    fn stage(&self, ctx: &CaseContext) -> Result<WhiteboxStage<T>, CaseStop> {
        WhiteboxStage::new(self, ctx, ManualPublisher::new(ctx))
    }

    fn happy_path(&self, ctx: &CaseContext) -> CaseResult {
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, HARNESS)?;
        let element = stage.send_next()?;
        stage.probe.expect_next_eq(HARNESS, &element)?;
        stage.puppet.signal_cancel();
        stage.publisher.expect_cancel(HARNESS)?;
        Ok(())
    }

    fn signals_demand(&self, ctx: &CaseContext) -> CaseResult {
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, RuleId::spec(2, 1))?;
        Ok(())
    }

    fn further_demand_after_on_next(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 1);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        let first = stage.send_next()?;
        stage.probe.expect_next_eq(rule, &first)?;

        // With its demand used up the subscriber must ask again or cancel,
        // on its own.
        await_demand_or_cancel(&stage.publisher, ctx.timeout(), rule)?;
        Ok(())
    }

    fn quiet_on_complete(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 3);
        let stage = self.stage(ctx)?;
        stage.publisher.settle_upstream();
        stage.publisher.send_completion()?;
        stage.probe.expect_completion(rule)?;
        stage.probe.expect_none(rule)?;
        ctx.verify_no_async_errors()?;
        // Calls made later, from any thread, are just as wrong.
        stage.publisher.expect_no_upstream_signal(rule)?;
        Ok(())
    }

    fn quiet_on_error(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 3);
        let stage = self.stage(ctx)?;
        stage.publisher.settle_upstream();
        stage
            .publisher
            .send_error(FlowError::Failed("test failure".into()))?;
        stage.probe.expect_error(rule)?;
        stage.probe.expect_none(rule)?;
        ctx.verify_no_async_errors()?;
        // Calls made later, from any thread, are just as wrong.
        stage.publisher.expect_no_upstream_signal(rule)?;
        Ok(())
    }

    fn cancels_second_subscription(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 5);
        let stage = self.stage(ctx)?;
        let second = ManualPublisher::new(ctx);
        second
            .subscribe(Some(Arc::clone(&stage.subscriber)))
            .map_err(|err| VerificationError::misuse(format!("second stage: {err}")))?;
        second.expect_cancel(rule)?;
        // The first subscription stays usable.
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        Ok(())
    }

    fn cancels_when_directed(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 6);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        stage.puppet.signal_cancel();
        stage.publisher.expect_cancel(rule)?;
        Ok(())
    }

    fn tolerates_next_after_cancel(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 8);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        stage.puppet.signal_cancel();
        stage.publisher.expect_cancel(rule)?;

        // Elements already in flight when cancel was issued.
        stage.send_next()?;
        stage.send_next()?;
        stage
            .probe
            .recorder()
            .expect_no_signal_except(ctx.no_signal_window(), rule, |signal| {
                matches!(signal, Signal::ElementDelivered(_))
            })?;
        Ok(())
    }

    fn completion_after_request(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 9);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        stage.publisher.send_completion()?;
        stage.probe.expect_completion(rule)?;
        Ok(())
    }

    fn completion_without_request(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 9);
        let stage = self.stage(ctx)?;
        stage.publisher.send_completion()?;
        stage.probe.expect_completion(rule)?;
        Ok(())
    }

    fn error_after_request(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 10);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(1);
        await_demand(&stage.publisher, 1, rule)?;
        stage
            .publisher
            .send_error(FlowError::Failed("test failure".into()))?;
        stage.probe.expect_error(rule)?;
        Ok(())
    }

    fn error_without_request(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 10);
        let stage = self.stage(ctx)?;
        stage
            .publisher
            .send_error(FlowError::Failed("test failure".into()))?;
        stage.probe.expect_error(rule)?;
        Ok(())
    }

    fn reentrant_on_next(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 2);
        let elements: Vec<T> = (0..3).map(|id| self.fixture.create_element(id)).collect();
        let publisher = ManualPublisher::reentrant(ctx, elements.clone());
        let stage = WhiteboxStage::new(self, ctx, publisher)?;
        stage.puppet.trigger_demand(3);
        for element in &elements {
            stage.probe.expect_next_eq(rule, element)?;
        }
        Ok(())
    }

    fn request_registers_demand(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 8);
        let stage = self.stage(ctx)?;
        stage.puppet.trigger_demand(2);
        await_demand(&stage.publisher, 2, rule)?;
        let first = stage.send_next()?;
        let second = stage.send_next()?;
        stage.probe.expect_next_eq(rule, &first)?;
        stage.probe.expect_next_eq(rule, &second)?;
        Ok(())
    }
}
