//! Metering infrastructure - admission, usage events and period resets

mod dispatcher;
mod gateway;
mod scheduler;
mod sinks;

pub use dispatcher::{DispatcherConfig, UsageEventDispatcher, UsageEventPublisher};
pub use gateway::{GatewayConfig, MeteringGateway};
pub use scheduler::{PeriodPhase, PeriodResetScheduler, RolloverReport, SchedulerConfig};
pub use sinks::{ApiKeyActivityRecorder, LoggingUsageEventSink};

#[cfg(test)]
pub use sinks::InMemoryUsageEventLog;
