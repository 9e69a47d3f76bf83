//! Signal recording and timeout-bounded waiting.
//!
//! Everything the verification drivers observe about an implementation
//! under test passes through a [`recorder::SignalRecorder`]: callback threads
//! record, the single case thread waits. The only blocking operations in the
//! harness live here and all of them carry a hard deadline.

pub mod config;
mod deadline;
pub mod error;
pub mod reclaim;
pub mod recorder;
pub mod signal;
pub mod sink;
pub mod slot;

pub use config::{ConfigError, TimeoutConfig, TimeoutOverrides};
pub use error::{RuleId, VerificationError};
pub use recorder::SignalRecorder;
pub use signal::{RecordedSignal, Signal, SignalKind};
pub use sink::ErrorSink;
pub use slot::OnceSlot;
