//! Metering domain
//!
//! Verdicts handed back to the HTTP layer, the usage events published for
//! each admitted request, and the policy applied when a store is down.

mod event;
mod failure;
mod verdict;

pub use event::{UsageEvent, UsageEventSink};
pub use failure::FailureMode;
pub use verdict::Verdict;

#[cfg(test)]
pub use event::MockUsageEventSink;
