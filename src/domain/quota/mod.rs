//! Quota domain
//!
//! Policies describing how much a subscription may consume per period, the
//! counters that track consumption, and the store contract that keeps those
//! counters exact under concurrent access.

mod counter;
mod policy;
mod store;

pub use counter::{ConsumeOutcome, RolloverOutcome, UsageCounter, UsageSnapshot};
pub use policy::{OveragePolicy, PeriodLength, QuotaPolicy, QuotaPolicyError, RequestLimit};
pub use store::UsageCounterStore;
