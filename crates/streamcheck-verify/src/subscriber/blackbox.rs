use std::sync::Arc;

use streamcheck_flow::{AsyncPublisher, FlowError, Publisher, Subscriber};
use streamcheck_recorder::{RuleId, TimeoutConfig, VerificationError};

use super::untested_cases;
use crate::classify::{CaseResult, CaseStop, TestCase};
use crate::context::CaseContext;
use crate::fixture::BlackboxSubscriberFixture;
use crate::probe::ObservedPublisher;
use crate::runner::{self, SuiteReport, TestReport};
use crate::stage::ManualPublisher;
use crate::Element;

const HARNESS: RuleId = RuleId::Harness;

/// Elements the helper publisher produces for the happy path.
const HAPPY_PATH_ELEMENTS: u64 = 3;

pub struct BlackboxSubscriberVerification<T> {
    fixture: Arc<dyn BlackboxSubscriberFixture<T>>,
    config: TimeoutConfig,
}

impl<T: Element> BlackboxSubscriberVerification<T> {
    pub fn new(fixture: impl BlackboxSubscriberFixture<T> + 'static, config: TimeoutConfig) -> Self {
        Self {
            fixture: Arc::new(fixture),
            config,
        }
    }

    pub fn cases() -> Vec<TestCase<Self>> {
        let mut cases = vec![
            TestCase::required(HARNESS, "exerciseBlackboxHappyPath", Self::happy_path),
            TestCase::required(
                RuleId::spec(2, 1),
                "mustSignalDemandViaSubscriptionRequest",
                Self::signals_demand,
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
        ];
        cases.extend(untested_cases(true));
        cases
    }

    pub fn run_all(&self) -> SuiteReport {
        runner::run_cases("blackbox-subscriber", self, &Self::cases(), self.config)
    }

    pub fn run(&self, name: &str) -> Option<TestReport> {
        runner::run_named("blackbox-subscriber", self, &Self::cases(), name, self.config)
    }

    fn create_subscriber(&self) -> Result<Arc<dyn Subscriber<T>>, CaseStop> {
        self.fixture
            .create_subscriber()
            .ok_or_else(|| VerificationError::misuse("fixture returned no subscriber").into())
    }

    /// A fresh subscriber subscribed to a manual publisher.
    fn stage(
        &self,
        ctx: &CaseContext,
    ) -> Result<(Arc<ManualPublisher<T>>, Arc<dyn Subscriber<T>>), CaseStop> {
        let subscriber = self.create_subscriber()?;
        let stage = ManualPublisher::new(ctx);
        stage
            .subscribe(Some(Arc::clone(&subscriber)))
            .map_err(|err| VerificationError::misuse(format!("stage rejected subscriber: {err}")))?;
        Ok((stage, subscriber))
    }

    /// A fresh subscriber that has already asked for something.
    fn requesting_stage(
        &self,
        ctx: &CaseContext,
        rule: RuleId,
    ) -> Result<(Arc<ManualPublisher<T>>, Arc<dyn Subscriber<T>>), CaseStop> {
        let (stage, subscriber) = self.stage(ctx)?;
        self.fixture.trigger_request(&subscriber);
        stage.expect_request(rule)?;
        Ok((stage, subscriber))
    }

    /// The fixture's helper publisher, or an asynchronous one over
    /// `create_element` when it has none.
    fn helper_publisher(&self) -> Arc<dyn Publisher<T>> {
        self.fixture
            .create_helper_publisher(HAPPY_PATH_ELEMENTS)
            .unwrap_or_else(|| {
                tracing::debug!("no helper publisher from fixture, generating one");
                let elements = (0..HAPPY_PATH_ELEMENTS)
                    .map(|id| self.fixture.create_element(id))
                    .collect();
                Arc::new(AsyncPublisher::from_vec(elements))
            })
    }

    fn happy_path(&self, ctx: &CaseContext) -> CaseResult {
        let observed = ObservedPublisher::new(ctx, self.helper_publisher());
        let subscriber = self.create_subscriber()?;
        observed
            .subscribe(Some(Arc::clone(&subscriber)))
            .map_err(|err| VerificationError::misuse(format!("helper rejected subscriber: {err}")))?;
        self.fixture.trigger_request(&subscriber);

        let delivered = observed.delivered();
        delivered.expect_subscription(ctx.timeout(), HARNESS)?;
        for _ in 0..HAPPY_PATH_ELEMENTS {
            delivered.expect_element(ctx.timeout(), HARNESS)?;
        }
        delivered.expect_completion(ctx.timeout(), HARNESS)?;
        observed
            .upstream()
            .expect_demand(ctx.timeout(), RuleId::spec(2, 1))?;
        Ok(())
    }

    fn signals_demand(&self, ctx: &CaseContext) -> CaseResult {
        self.requesting_stage(ctx, RuleId::spec(2, 1))?;
        Ok(())
    }

    fn quiet_on_complete(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 3);
        let (stage, _subscriber) = self.requesting_stage(ctx, rule)?;
        stage.settle_upstream();
        stage.send_completion()?;
        ctx.verify_no_async_errors()?;
        stage.expect_no_upstream_signal(rule)?;
        Ok(())
    }

    fn quiet_on_error(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 3);
        let (stage, _subscriber) = self.requesting_stage(ctx, rule)?;
        stage.settle_upstream();
        stage.send_error(FlowError::Failed("test failure".into()))?;
        ctx.verify_no_async_errors()?;
        stage.expect_no_upstream_signal(rule)?;
        Ok(())
    }

    fn cancels_second_subscription(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(2, 5);
        let (_first, subscriber) = self.stage(ctx)?;
        let second = ManualPublisher::new(ctx);
        second
            .subscribe(Some(subscriber))
            .map_err(|err| VerificationError::misuse(format!("second stage: {err}")))?;
        second.expect_cancel(rule)?;
        Ok(())
    }

    fn completion_after_request(&self, ctx: &CaseContext) -> CaseResult {
        let (stage, _subscriber) = self.requesting_stage(ctx, RuleId::spec(2, 9))?;
        stage.send_completion()?;
        Ok(())
    }

    fn completion_without_request(&self, ctx: &CaseContext) -> CaseResult {
        let (stage, _subscriber) = self.stage(ctx)?;
        stage.send_completion()?;
        Ok(())
    }

    fn error_after_request(&self, ctx: &CaseContext) -> CaseResult {
        let (stage, _subscriber) = self.requesting_stage(ctx, RuleId::spec(2, 10))?;
        stage.send_error(FlowError::Failed("test failure".into()))?;
        Ok(())
    }

    fn error_without_request(&self, ctx: &CaseContext) -> CaseResult {
        let (stage, _subscriber) = self.stage(ctx)?;
        stage.send_error(FlowError::Failed("test failure".into()))?;
        Ok(())
    }
}
