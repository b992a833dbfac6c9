//! Period reset scheduler
//!
//! Rolls every live subscription into its current period on a timer, so
//! usage resets happen even for subscriptions that receive no traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::quota::{RolloverOutcome, UsageCounterStore};
use crate::domain::subscription::{SubscriptionId, SubscriptionRepository};
use crate::domain::DomainError;
use crate::infrastructure::observability::record_rollover;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Where a subscription is in its period lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodPhase {
    ActivePeriod,
    RollingOver,
}

/// Totals for one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    pub scanned: usize,
    pub rolled_over: usize,
    pub already_current: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Clears the `RollingOver` mark however the rollover ends
struct PhaseGuard<'a> {
    phases: &'a DashMap<SubscriptionId, PeriodPhase>,
    id: SubscriptionId,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phases
            .insert(self.id.clone(), PeriodPhase::ActivePeriod);
    }
}

#[derive(Debug)]
pub struct PeriodResetScheduler {
    subscriptions: Arc<dyn SubscriptionRepository>,
    counters: Arc<dyn UsageCounterStore>,
    phases: DashMap<SubscriptionId, PeriodPhase>,
}

impl PeriodResetScheduler {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        counters: Arc<dyn UsageCounterStore>,
    ) -> Self {
        Self {
            subscriptions,
            counters,
            phases: DashMap::new(),
        }
    }

    pub fn phase(&self, subscription_id: &SubscriptionId) -> PeriodPhase {
        self.phases
            .get(subscription_id)
            .map(|phase| *phase)
            .unwrap_or(PeriodPhase::ActivePeriod)
    }

    /// Open the period starting at `period_start` for one subscription
    ///
    /// Safe to repeat: a period that is already open yields
    /// `AlreadyCurrent`. A rollover already running for the same
    /// subscription yields `Conflict`.
    pub async fn rollover(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<RolloverOutcome, DomainError> {
        let _guard = self.enter_rollover(subscription_id)?;

        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!("Subscription '{}' not found", subscription_id))
            })?;

        let policy = subscription.policy_for(period_start);
        let period_end = subscription.period_end_for(period_start, &policy);
        let outcome = self
            .counters
            .open_period(subscription_id, period_start, period_end, &policy)
            .await?;

        // Also catches up a subscription whose period was opened on demand
        let open = match &outcome {
            RolloverOutcome::Opened { counter, .. } => Some(counter.clone()),
            RolloverOutcome::AlreadyCurrent { .. } => {
                self.counters.current(subscription_id).await?
            }
        };

        if let Some(counter) =
            open.filter(|c| c.period_start() > subscription.current_period_start())
        {
            self.subscriptions
                .advance_period(subscription_id, counter.period_start(), *counter.policy())
                .await?;
        }

        record_rollover(outcome.is_opened());
        match &outcome {
            RolloverOutcome::Opened { archived, .. } => info!(
                subscription_id = %subscription_id,
                period_start = %period_start,
                archived_count = archived.as_ref().map(|c| c.consumed_count()),
                "Usage period rolled over"
            ),
            RolloverOutcome::AlreadyCurrent { period_start } => debug!(
                subscription_id = %subscription_id,
                period_start = %period_start,
                "Usage period already current"
            ),
        }

        Ok(outcome)
    }

    /// Roll every subscription whose period has ended as of `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RolloverReport, DomainError> {
        let subscriptions = self.subscriptions.list_rollable().await?;
        let mut report = RolloverReport {
            scanned: subscriptions.len(),
            ..RolloverReport::default()
        };

        for subscription in subscriptions {
            let target = subscription.period_start_at(now);

            if target <= subscription.current_period_start() {
                continue;
            }

            match self.rollover(subscription.id(), target).await {
                Ok(outcome) if outcome.is_opened() => report.rolled_over += 1,
                Ok(_) => report.already_current += 1,
                Err(DomainError::Conflict { .. }) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        subscription_id = %subscription.id(),
                        error = %e,
                        "Usage period rollover failed; will retry next pass"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Run [`run_once`](Self::run_once) every `interval` until `shutdown` fires
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            info!(interval_secs = interval.as_secs(), "Period reset scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => match self.run_once(Utc::now()).await {
                        Ok(report) if report.rolled_over > 0 || report.failed > 0 => {
                            info!(
                                scanned = report.scanned,
                                rolled_over = report.rolled_over,
                                failed = report.failed,
                                "Period reset pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Period reset pass failed"),
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Period reset scheduler stopped");
        })
    }

    fn enter_rollover(&self, id: &SubscriptionId) -> Result<PhaseGuard<'_>, DomainError> {
        match self.phases.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == PeriodPhase::RollingOver {
                    return Err(DomainError::conflict(format!(
                        "Rollover already in progress for subscription '{}'",
                        id
                    )));
                }
                entry.insert(PeriodPhase::RollingOver);
            }
            Entry::Vacant(entry) => {
                entry.insert(PeriodPhase::RollingOver);
            }
        }

        Ok(PhaseGuard {
            phases: &self.phases,
            id: id.clone(),
        })
    }
}
