//! Verification of a publisher produced by a [`PublisherFixture`].
//!
//! Each case builds its own publisher and [`ManualSubscriber`], drives
//! demand from the case thread and asserts on what the subscriber records.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use streamcheck_flow::{FlowError, Publisher, Subscriber};
use streamcheck_recorder::reclaim::expect_reclaimed;
use streamcheck_recorder::{RuleId, Signal, TimeoutConfig, VerificationError};

use crate::capability::{at_most, require_failed_publisher, PublisherCapabilities};
use crate::classify::{CaseResult, CaseStop, TestCase};
use crate::context::CaseContext;
use crate::fixture::PublisherFixture;
use crate::probe::{ManualSubscriber, Reactions};
use crate::runner::{self, SuiteReport, TestReport};
use crate::Element;

const HARNESS: RuleId = RuleId::Harness;

/// Seed for the random demand pattern of the serialization check.
pub const DEFAULT_DEMAND_SEED: u64 = 0x5eed_1030;

pub struct PublisherVerification<T> {
    fixture: Arc<dyn PublisherFixture<T>>,
    config: TimeoutConfig,
    seed: u64,
}

impl<T: Element> PublisherVerification<T> {
    pub fn new(fixture: impl PublisherFixture<T> + 'static, config: TimeoutConfig) -> Self {
        Self::from_arc(Arc::new(fixture), config)
    }

    pub fn from_arc(fixture: Arc<dyn PublisherFixture<T>>, config: TimeoutConfig) -> Self {
        Self {
            fixture,
            config,
            seed: DEFAULT_DEMAND_SEED,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn cases() -> Vec<TestCase<Self>> {
        vec![
            TestCase::required(
                HARNESS,
                "createPublisher1MustProduceAStreamOfExactly1Element",
                Self::stream_of_one,
            ),
            TestCase::required(
                HARNESS,
                "createPublisher3MustProduceAStreamOfExactly3Elements",
                Self::stream_of_three,
            ),
            TestCase::required(
                HARNESS,
                "validate_boundedDepthOfOnNextAndRequestRecursion",
                Self::valid_recursion_bound,
            ),
            TestCase::required(
                RuleId::spec(1, 1),
                "subscriptionRequestMustResultInTheCorrectNumberOfProducedElements",
                Self::produces_requested_count,
            ),
            TestCase::required(
                RuleId::spec(1, 2),
                "maySignalLessThanRequestedAndTerminateSubscription",
                Self::signals_less_and_terminates,
            ),
            TestCase::stochastic(
                RuleId::spec(1, 3),
                "mustSignalOnMethodsSequentially",
                Self::signals_sequentially,
            ),
            TestCase::optional(
                RuleId::spec(1, 4),
                "mustSignalOnErrorWhenFails",
                Self::signals_error_when_failed,
            ),
            TestCase::required(
                RuleId::spec(1, 5),
                "mustSignalOnCompleteWhenFiniteStreamTerminates",
                Self::completes_finite_stream,
            ),
            TestCase::optional(
                RuleId::spec(1, 5),
                "emptyStreamMustTerminateBySignallingOnComplete",
                Self::completes_empty_stream,
            ),
            TestCase::untested(
                RuleId::spec(1, 6),
                "mustConsiderSubscriptionCancelledAfterOnErrorOrOnCompleteHasBeenCalled",
                "internal publisher state is not observable",
            ),
            TestCase::required(
                RuleId::spec(1, 7),
                "mustNotEmitFurtherSignalsOnceOnCompleteHasBeenSignalled",
                Self::silent_after_completion,
            ),
            TestCase::untested(
                RuleId::spec(1, 8),
                "possiblyCanceledSubscriptionShouldNotReceiveOnErrorOrOnCompleteSignals",
                "racing cancel against a terminal signal cannot be provoked reliably",
            ),
            TestCase::required(
                RuleId::spec(1, 9),
                "mustIssueOnSubscribeForNonNullSubscriber",
                Self::issues_on_subscribe,
            ),
            TestCase::required(
                RuleId::spec(1, 9),
                "subscribeMustFailOnAbsentSubscriber",
                Self::rejects_absent_subscriber,
            ),
            TestCase::required(
                RuleId::spec(1, 9),
                "rejectionMustTriggerOnErrorAfterOnSubscribe",
                Self::error_follows_on_subscribe,
            ),
            TestCase::untested(
                RuleId::spec(1, 10),
                "rejectASubscriptionRequestIfTheSameSubscriberSubscribesTwice",
                "whether a repeat subscribe is rejected is the publisher's choice",
            ),
            TestCase::required(
                RuleId::spec(1, 11),
                "mustServeSubscribersOfFreshInstancesIndependently",
                Self::fresh_instances_independent,
            ),
            TestCase::optional(
                RuleId::spec(1, 11),
                "maySupportMultiSubscribe",
                Self::multi_subscribe,
            ),
            TestCase::optional(
                RuleId::spec(1, 11),
                "multicast_mustProduceTheSameElementsInTheSameSequenceToAllOfItsSubscribers",
                Self::multicast_same_sequence,
            ),
            TestCase::required(
                RuleId::spec(3, 2),
                "mustAllowSynchronousRequestCallsFromOnNextAndOnSubscribe",
                Self::synchronous_request_from_callbacks,
            ),
            TestCase::required(
                RuleId::spec(3, 3),
                "mustNotAllowUnboundedRecursionBetweenRequestAndOnNext",
                Self::bounded_recursion,
            ),
            TestCase::required(
                RuleId::spec(3, 6),
                "afterSubscriptionIsCancelledRequestMustBeNops",
                Self::request_after_cancel_is_nop,
            ),
            TestCase::required(
                RuleId::spec(3, 7),
                "afterSubscriptionIsCancelledAdditionalCancelationsMustBeNops",
                Self::repeated_cancel_is_nop,
            ),
            TestCase::required(
                RuleId::spec(3, 9),
                "requestZeroMustSignalIllegalArgument",
                Self::request_zero_fails,
            ),
            TestCase::required(
                RuleId::spec(3, 9),
                "requestNegativeNumberMustSignalIllegalArgument",
                Self::request_negative_fails,
            ),
            TestCase::required(
                RuleId::spec(3, 12),
                "cancelMustMakeThePublisherToEventuallyStopSignaling",
                Self::cancel_stops_signaling,
            ),
            TestCase::stochastic(
                RuleId::spec(3, 13),
                "cancelMustMakeThePublisherEventuallyDropAllReferencesToTheSubscriber",
                Self::cancel_releases_subscriber,
            ),
            TestCase::required(
                RuleId::spec(3, 17),
                "mustSupportAPendingElementCountUpToLongMaxValue",
                Self::pending_up_to_max,
            ),
            TestCase::required(
                RuleId::spec(3, 17),
                "mustSupportACumulativePendingElementCountUpToLongMaxValue",
                Self::cumulative_pending_up_to_max,
            ),
            TestCase::required(
                RuleId::spec(3, 17),
                "mustNotSignalOnErrorWhenPendingAboveLongMaxValue",
                Self::no_error_above_max,
            ),
        ]
    }

    pub fn run_all(&self) -> SuiteReport {
        self.run_suite("publisher")
    }

    pub fn run_suite(&self, suite: &str) -> SuiteReport {
        runner::run_cases(suite, self, &Self::cases(), self.config)
    }

    /// Run one case by its full name.
    pub fn run(&self, name: &str) -> Option<TestReport> {
        runner::run_named("publisher", self, &Self::cases(), name, self.config)
    }

    fn caps(&self) -> PublisherCapabilities {
        self.fixture.capabilities()
    }

    fn activate(&self, elements: u64) -> Result<Arc<dyn Publisher<T>>, CaseStop> {
        self.caps().require_elements(elements)?;
        self.fixture.create_publisher(elements).ok_or_else(|| {
            CaseStop::Failed(VerificationError::misuse(format!(
                "fixture returned no publisher for {elements} elements"
            )))
        })
    }

    fn subscribe(
        &self,
        ctx: &CaseContext,
        publisher: &Arc<dyn Publisher<T>>,
        reactions: Reactions,
    ) -> Result<Arc<ManualSubscriber<T>>, CaseStop> {
        let sub = ManualSubscriber::with_reactions(ctx, reactions);
        publisher
            .subscribe(Some(sub.clone() as Arc<dyn Subscriber<T>>))
            .map_err(|err| {
                VerificationError::violation(
                    RuleId::spec(1, 9),
                    format!("subscribe rejected a present subscriber: {err}"),
                )
            })?;
        sub.expect_subscribed(RuleId::spec(1, 9))?;
        Ok(sub)
    }

    /// Request one past the end; the stream must complete instead.
    fn expect_exact_stream(&self, ctx: &CaseContext, elements: u64) -> CaseResult {
        self.caps().require_completion()?;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(elements as i64);
        sub.next_elements(elements, HARNESS)?;
        sub.request(1);
        sub.expect_completion(HARNESS)?;
        sub.expect_none(HARNESS)?;
        Ok(())
    }

    fn stream_of_one(&self, ctx: &CaseContext) -> CaseResult {
        self.expect_exact_stream(ctx, 1)
    }

    fn stream_of_three(&self, ctx: &CaseContext) -> CaseResult {
        self.expect_exact_stream(ctx, 3)
    }

    fn valid_recursion_bound(&self, _ctx: &CaseContext) -> CaseResult {
        let depth = self.caps().bounded_recursion_depth;
        if depth == 0 {
            return Err(VerificationError::violation(
                HARNESS,
                "bounded_recursion_depth must be at least 1",
            )
            .into());
        }
        Ok(())
    }

    fn produces_requested_count(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 1);
        let publisher = self.activate(5)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;

        sub.request(1);
        sub.next_element(rule)?;
        sub.expect_none(rule)?;

        sub.request(1);
        sub.request(2);
        sub.next_elements(3, rule)?;
        sub.expect_none(rule)?;

        sub.cancel();
        Ok(())
    }

    fn signals_less_and_terminates(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 2);
        self.caps().require_completion()?;
        let publisher = self.activate(3)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(10);
        sub.next_elements(3, rule)?;
        sub.expect_completion(rule)?;
        sub.expect_none(rule)?;
        Ok(())
    }

    fn signals_sequentially(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 3);
        let elements = at_most(&self.caps(), 50);
        self.caps().require_elements(elements.max(2))?;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut remaining = elements;
        while remaining > 0 {
            let batch = rng.gen_range(1..=remaining.min(5));
            sub.request(batch as i64);
            sub.next_elements(batch, rule)?;
            remaining -= batch;
        }
        sub.cancel();
        Ok(())
    }

    fn signals_error_when_failed(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 4);
        let publisher = require_failed_publisher(self.fixture.create_failed_publisher())?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(1);
        sub.expect_error(rule)?;
        sub.expect_none(rule)?;
        Ok(())
    }

    fn completes_finite_stream(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 5);
        self.caps().require_completion()?;
        let publisher = self.activate(3)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(3);
        sub.next_elements(3, rule)?;
        sub.expect_completion(rule)?;
        Ok(())
    }

    fn completes_empty_stream(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 5);
        self.caps().require_completion()?;
        let publisher = self.activate(0)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.expect_completion(rule)?;
        sub.expect_none(rule)?;
        Ok(())
    }

    fn silent_after_completion(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 7);
        self.caps().require_completion()?;
        let publisher = self.activate(1)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(10);
        sub.next_element(rule)?;
        sub.expect_completion(rule)?;
        sub.request(10);
        sub.cancel();
        sub.expect_none(rule)?;
        Ok(())
    }

    fn issues_on_subscribe(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 9);
        let publisher = self.activate(at_most(&self.caps(), 1))?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        // Nothing but a possible completion of an empty stream may follow.
        sub.recorder()
            .expect_no_signal_except(ctx.no_signal_window(), rule, |signal| {
                matches!(signal, Signal::Completed)
            })?;
        Ok(())
    }

    fn rejects_absent_subscriber(&self, _ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 9);
        let publisher = self.activate(at_most(&self.caps(), 1))?;
        match publisher.subscribe(None) {
            Err(FlowError::NullArgument(_)) => Ok(()),
            Err(other) => Err(VerificationError::violation(
                rule,
                format!("absent subscriber rejected with the wrong error: {other}"),
            )
            .into()),
            Ok(()) => Err(VerificationError::violation(
                rule,
                "subscribe accepted an absent subscriber",
            )
            .into()),
        }
    }

    fn error_follows_on_subscribe(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 9);
        let publisher = require_failed_publisher(self.fixture.create_failed_publisher())?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.expect_error(rule)?;
        Ok(())
    }

    fn fresh_instances_independent(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 11);
        let first = self.activate(2)?;
        let second = self.activate(2)?;
        let a = self.subscribe(ctx, &first, Reactions::default())?;
        let b = self.subscribe(ctx, &second, Reactions::default())?;

        a.request(2);
        a.next_elements(2, rule)?;
        b.expect_none(rule)?;

        b.request(2);
        b.next_elements(2, rule)?;
        a.cancel();
        b.cancel();
        Ok(())
    }

    fn multi_subscribe(&self, ctx: &CaseContext) -> CaseResult {
        let publisher = self.activate(at_most(&self.caps(), 1))?;
        let a = self.subscribe(ctx, &publisher, Reactions::default())?;
        let b = self.subscribe(ctx, &publisher, Reactions::default())?;
        a.cancel();
        b.cancel();
        Ok(())
    }

    fn multicast_same_sequence(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(1, 11);
        let publisher = self.activate(5)?;
        let subs = [
            self.subscribe(ctx, &publisher, Reactions::default())?,
            self.subscribe(ctx, &publisher, Reactions::default())?,
            self.subscribe(ctx, &publisher, Reactions::default())?,
        ];
        for sub in &subs {
            sub.request(5);
        }
        let mut sequences = Vec::with_capacity(subs.len());
        for sub in &subs {
            sequences.push(sub.next_elements(5, rule)?);
        }
        if let Some(odd) = sequences.iter().position(|seq| *seq != sequences[0]) {
            return Err(VerificationError::violation(
                rule,
                format!(
                    "subscriber {odd} saw {:?}, subscriber 0 saw {:?}",
                    sequences[odd], sequences[0]
                ),
            )
            .into());
        }
        Ok(())
    }

    fn synchronous_request_from_callbacks(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 2);
        let elements = at_most(&self.caps(), 6);
        self.caps().require_elements(elements.max(2))?;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(
            ctx,
            &publisher,
            Reactions {
                request_on_subscribe: Some(1),
                request_on_next: Some(1),
                cancel_after: Some(elements),
                ..Reactions::default()
            },
        )?;
        sub.next_elements(elements, rule)?;
        Ok(())
    }

    fn bounded_recursion(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 3);
        let depth = self.caps().bounded_recursion_depth;
        let elements = depth as u64 + 1;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(
            ctx,
            &publisher,
            Reactions {
                request_on_subscribe: Some(1),
                request_on_next: Some(1),
                cancel_after: Some(elements),
                recursion_bound: Some(depth),
            },
        )?;
        sub.next_elements(elements, rule)?;
        Ok(())
    }

    fn request_after_cancel_is_nop(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 6);
        let publisher = self.activate(at_most(&self.caps(), 3).max(1))?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.cancel();
        sub.request(1);
        sub.request(1);
        sub.request(1);
        sub.expect_none(rule)?;
        Ok(())
    }

    fn repeated_cancel_is_nop(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 7);
        let publisher = self.activate(at_most(&self.caps(), 1).max(1))?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.cancel();
        sub.cancel();
        sub.cancel();
        sub.expect_none(rule)?;
        Ok(())
    }

    fn expect_illegal_request(&self, ctx: &CaseContext, n: i64) -> CaseResult {
        let rule = RuleId::spec(3, 9);
        let publisher = self.activate(at_most(&self.caps(), 10).max(1))?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(n);
        let err = sub.expect_error(rule)?;
        if !err.is_illegal_argument() {
            return Err(VerificationError::violation(
                rule,
                format!("request({n}) signalled {err}, expected an illegal-argument error"),
            )
            .into());
        }
        sub.expect_none(rule)?;
        Ok(())
    }

    fn request_zero_fails(&self, ctx: &CaseContext) -> CaseResult {
        self.expect_illegal_request(ctx, 0)
    }

    fn request_negative_fails(&self, ctx: &CaseContext) -> CaseResult {
        self.expect_illegal_request(ctx, -1)
    }

    fn cancel_stops_signaling(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 12);
        let elements = at_most(&self.caps(), 20);
        self.caps().require_elements(elements.max(2))?;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;

        let demand = elements / 2;
        sub.request(demand as i64);
        sub.next_element(rule)?;
        sub.cancel();

        // In-flight elements up to the outstanding demand may still arrive.
        let mut late = 1u64;
        loop {
            match sub
                .recorder()
                .expect_signal(ctx.no_signal_window(), rule, "silence after cancel")
            {
                Err(_) => return Ok(()),
                Ok(Signal::ElementDelivered(_)) if late < demand => late += 1,
                Ok(other) => {
                    return Err(VerificationError::violation(
                        rule,
                        format!("still signalling after cancel: {other:?} (after {late} elements)"),
                    )
                    .into())
                }
            }
        }
    }

    fn cancel_releases_subscriber(&self, ctx: &CaseContext) -> CaseResult {
        let publisher = self.activate(at_most(&self.caps(), 3).max(1))?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        let handle = Arc::downgrade(&sub);
        sub.cancel();
        drop(sub);
        expect_reclaimed(
            &handle,
            ctx.config().reclamation_timeout,
            ctx.config().poll_interval,
            RuleId::spec(3, 13),
            "cancelled subscriber",
        )?;
        Ok(())
    }

    fn pending_up_to_max(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 17);
        let publisher = self.activate(3)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(i64::MAX);
        sub.next_elements(3, rule)?;
        self.finish(&sub, rule)
    }

    fn cumulative_pending_up_to_max(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 17);
        let publisher = self.activate(3)?;
        let sub = self.subscribe(ctx, &publisher, Reactions::default())?;
        sub.request(i64::MAX / 2);
        sub.request(i64::MAX / 2);
        sub.request(1);
        sub.next_elements(3, rule)?;
        self.finish(&sub, rule)
    }

    fn no_error_above_max(&self, ctx: &CaseContext) -> CaseResult {
        let rule = RuleId::spec(3, 17);
        let received = 10;
        let elements = at_most(&self.caps(), i32::MAX as u64);
        self.caps().require_elements(elements.max(received + 1))?;
        let publisher = self.activate(elements)?;
        let sub = self.subscribe(
            ctx,
            &publisher,
            Reactions {
                request_on_subscribe: Some(i64::MAX),
                request_on_next: Some(i64::MAX),
                cancel_after: Some(received),
                ..Reactions::default()
            },
        )?;
        sub.next_elements(received, rule)?;
        sub.recorder()
            .expect_no_signal_except(ctx.no_signal_window(), rule, |signal| {
                matches!(signal, Signal::ElementDelivered(_) | Signal::Completed)
            })?;
        Ok(())
    }

    fn finish(&self, sub: &ManualSubscriber<T>, rule: RuleId) -> CaseResult {
        if self.caps().can_signal_completion {
            sub.expect_completion(rule)?;
        } else {
            sub.cancel();
        }
        Ok(())
    }
}
