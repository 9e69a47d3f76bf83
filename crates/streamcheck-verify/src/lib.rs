//! Conformance verification for demand-driven reactive stream components.
//!
//! A user implements one of the fixture traits in [`fixture`] for the
//! component under test and hands it to the matching driver:
//!
//! - [`PublisherVerification`] for publishers,
//! - [`WhiteboxSubscriberVerification`] and [`BlackboxSubscriberVerification`]
//!   for subscribers,
//! - [`IdentityProcessorVerification`] for identity processors.
//!
//! Each driver exposes its cases as [`TestCase`] values and runs them into a
//! [`SuiteReport`]: one outcome per case, classified as pass, fail or
//! skipped, with the violated rule attached to every failure.

pub mod capability;
pub mod classify;
pub mod context;
pub mod fixture;
pub mod probe;
pub mod processor;
pub mod publisher;
pub mod runner;
pub mod stage;
pub mod subscriber;

use std::fmt::Debug;

pub use capability::{PublisherCapabilities, UNBOUNDED};
pub use classify::{CaseResult, CaseStop, Classification, Outcome, SkipReason, TestCase};
pub use context::CaseContext;
pub use fixture::{
    BlackboxSubscriberFixture, IdentityProcessorFixture, ProcessorHandle, PublisherFixture,
    WhiteboxSubscriberFixture,
};
pub use probe::{ManualSubscriber, Reactions, SubscriberPuppet, SubscriptionPuppet, WhiteboxProbe};
pub use processor::IdentityProcessorVerification;
pub use publisher::PublisherVerification;
pub use runner::{SuiteReport, Summary, TestReport};
pub use stage::ManualPublisher;
pub use subscriber::{BlackboxSubscriberVerification, WhiteboxSubscriberVerification};

pub use streamcheck_recorder::{RuleId, TimeoutConfig, TimeoutOverrides, VerificationError};

/// What the harness needs from a stream element: it is cloned into
/// recorders, compared against expectations and printed in failures.
pub trait Element: Clone + Debug + PartialEq + Send + Sync + 'static {}

impl<T> Element for T where T: Clone + Debug + PartialEq + Send + Sync + 'static {}
