//! Subscriber verification, in two flavours.
//!
//! [`WhiteboxSubscriberVerification`] needs a subscriber that reports its
//! callbacks to a probe and registers a puppet; in exchange it can check
//! what the subscriber received. [`BlackboxSubscriberVerification`] works
//! with any subscriber but only sees the calls it makes on its
//! subscription.

mod blackbox;
mod whitebox;

pub use blackbox::BlackboxSubscriberVerification;
pub use whitebox::WhiteboxSubscriberVerification;

use streamcheck_recorder::{RuleId, Signal, VerificationError};

use crate::classify::TestCase;
use crate::stage::ManualPublisher;
use crate::Element;

/// Sum upstream `request(n)` calls until at least `wanted` is outstanding.
pub(crate) fn await_demand<T: Element>(
    stage: &ManualPublisher<T>,
    wanted: u64,
    rule: RuleId,
) -> Result<u64, VerificationError> {
    let mut total = 0u64;
    while total < wanted {
        let n = stage.expect_request(rule)?;
        total = total.saturating_add(n.max(0) as u64);
    }
    Ok(total)
}

/// Wait for either more demand or a cancel.
pub(crate) fn await_demand_or_cancel<T: Element>(
    stage: &ManualPublisher<T>,
    timeout: std::time::Duration,
    rule: RuleId,
) -> Result<(), VerificationError> {
    stage
        .upstream()
        .expect_signal_matching(timeout, rule, "request(n) or cancel", |signal| {
            matches!(signal, Signal::DemandRequested(_) | Signal::Cancelled)
        })
        .map(|_| ())
}

/// Rules neither flavour can check from outside a subscriber.
pub(crate) fn untested_cases<D>(blackbox: bool) -> Vec<TestCase<D>> {
    let mut cases = vec![
        TestCase::untested(
            RuleId::spec(2, 2),
            "shouldAsynchronouslyDispatch",
            "where the subscriber processes signals is invisible",
        ),
        TestCase::untested(
            RuleId::spec(2, 4),
            "mustConsiderTheSubscriptionAsCancelledInAfterRecievingOnCompleteOrOnError",
            "the subscriber's internal state is invisible",
        ),
        TestCase::untested(
            RuleId::spec(2, 7),
            "mustNotCallMethodsOnSubscriptionOrPublisherConcurrently",
            "interleavings of subscription calls cannot be forced",
        ),
        TestCase::untested(
            RuleId::spec(2, 11),
            "mustMakeSureThatAllCallsOnItsMethodsHappenBeforeTheProcessingOfTheRespectiveEvents",
            "happens-before relations are invisible",
        ),
        TestCase::untested(
            RuleId::spec(2, 12),
            "mustNotAcceptAnOnSubscribeWithTheSameSubscriberTwice",
            "a subscriber cannot be made to accept the same subscription twice",
        ),
        TestCase::untested(
            RuleId::spec(2, 13),
            "failingOnSignalInvocation",
            "absent arguments cannot be constructed",
        ),
        TestCase::untested(
            RuleId::spec(3, 1),
            "requestMustOnlyBeCalledInsideSubscriberContext",
            "calling context is invisible",
        ),
        TestCase::untested(
            RuleId::spec(3, 10),
            "mayRequestFromOnNextSynchronously",
            "permissive rule, nothing to fail",
        ),
        TestCase::untested(
            RuleId::spec(3, 11),
            "mustNotAllowRequestMaximumToOverflowTheStack",
            "subscriber reentrancy depth is invisible",
        ),
        TestCase::untested(
            RuleId::spec(3, 14),
            "mustNotAllowCancelToThrowWhenSubscriberIsNull",
            "absent arguments cannot be constructed",
        ),
        TestCase::untested(
            RuleId::spec(3, 15),
            "mustNotAllowCancelToThrow",
            "covered by the publisher driver",
        ),
        TestCase::untested(
            RuleId::spec(3, 16),
            "mustNotAllowRequestToThrow",
            "covered by the publisher driver",
        ),
    ];
    if blackbox {
        cases.extend([
            TestCase::untested(
                RuleId::spec(2, 6),
                "mustCallSubscriptionCancelIfItIsNoLongerValid",
                "needs a view into the subscriber",
            ),
            TestCase::untested(
                RuleId::spec(2, 8),
                "mustBePreparedToReceiveOnNextSignalsAfterHavingCalledSubscriptionCancel",
                "needs a view into the subscriber",
            ),
            TestCase::untested(
                RuleId::spec(3, 8),
                "requestMustRegisterGivenNumberElementsToBeProduced",
                "needs a view into the subscriber",
            ),
        ]);
    }
    cases
}
