//! Rollover command - one scheduler pass, for cron-driven deployments

use chrono::{DateTime, Utc};
use clap::Args;
use tracing::info;

use crate::infrastructure::logging::init_logging;
use crate::infrastructure::metering::{PeriodResetScheduler, RolloverReport};
use crate::Repositories;

#[derive(Args, Clone, Debug)]
pub struct RolloverArgs {
    /// Evaluate periods as of this instant (RFC 3339) instead of now
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

pub async fn run(args: RolloverArgs) -> anyhow::Result<()> {
    let config = super::load_config()?;
    init_logging(&config.logging);

    let repositories = Repositories::connect(&config.storage).await?;
    let report = run_pass(&repositories, args.at.unwrap_or_else(Utc::now)).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.failed > 0 {
        anyhow::bail!("{} subscription(s) failed to roll over", report.failed);
    }

    Ok(())
}

async fn run_pass(
    repositories: &Repositories,
    now: DateTime<Utc>,
) -> anyhow::Result<RolloverReport> {
    let scheduler = PeriodResetScheduler::new(
        repositories.subscriptions.clone(),
        repositories.counters.clone(),
    );

    let report = scheduler.run_once(now).await?;
    info!(
        scanned = report.scanned,
        rolled_over = report.rolled_over,
        failed = report.failed,
        "Rollover pass finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::quota::QuotaPolicy;
    use crate::infrastructure::subscription::{SubscribeRequest, SubscriptionService};

    #[tokio::test]
    async fn test_run_pass_rolls_expired_subscriptions() {
        let repositories = Repositories::in_memory();
        let service = SubscriptionService::new(
            repositories.subscriptions.clone(),
            repositories.counters.clone(),
        );
        let request =
            SubscribeRequest::new("buyer-1", "listing-1").with_policy(QuotaPolicy::default());
        service.subscribe(request).await.unwrap();

        let later = Utc::now() + chrono::Duration::days(40);
        let report = run_pass(&repositories, later).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.rolled_over, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_run_pass_with_nothing_due() {
        let repositories = Repositories::in_memory();

        let report = run_pass(&repositories, Utc::now()).await.unwrap();

        assert_eq!(report, RolloverReport::default());
    }
}
