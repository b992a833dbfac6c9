//! PostgreSQL usage counter store
//!
//! Increments are a single conditional `UPDATE`, so the limit check and the
//! write are one atomic step inside the database. Rollover locks the active
//! row, archives it and inserts the next period in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::quota::{
    ConsumeOutcome, OveragePolicy, QuotaPolicy, RolloverOutcome, UsageCounter, UsageCounterStore,
};
use crate::domain::subscription::SubscriptionId;
use crate::domain::DomainError;
use crate::infrastructure::storage::map_sqlx_error;

const COLUMNS: &str =
    "subscription_id, period_start, period_end, consumed_count, policy, last_updated, archived_at";

/// Rounds of update-then-inspect before a consume gives up racing a rollover
const MAX_CONSUME_ATTEMPTS: usize = 3;

/// Usage counters in a `usage_counters` table
#[derive(Debug, Clone)]
pub struct PostgresUsageCounterStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresUsageCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, "usage_counters")
    }

    pub fn with_table(pool: PgPool, table_name: impl Into<String>) -> Self {
        Self {
            pool,
            table_name: table_name.into(),
        }
    }

    /// Ensures the counter table and its active-row index exist
    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                subscription_id VARCHAR(255) NOT NULL,
                period_start TIMESTAMPTZ NOT NULL,
                period_end TIMESTAMPTZ NOT NULL,
                consumed_count BIGINT NOT NULL DEFAULT 0,
                request_limit BIGINT,
                overage VARCHAR(32) NOT NULL,
                policy JSONB NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                archived BOOLEAN NOT NULL DEFAULT FALSE,
                archived_at TIMESTAMPTZ,
                PRIMARY KEY (subscription_id, period_start)
            )
            "#,
            table = self.table_name
        );

        let index = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_active_idx ON {table} (subscription_id) WHERE NOT archived",
            table = self.table_name
        );

        for statement in [create, index] {
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("Failed to create usage counter table", e))?;
        }

        Ok(())
    }

    async fn fetch_active(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsageCounter>, DomainError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE subscription_id = $1 AND NOT archived",
            self.table_name
        );

        let row = sqlx::query(&query)
            .bind(subscription_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to read usage counter", e))?;

        row.map(|row| counter_from_row(&row)).transpose()
    }
}

#[async_trait]
impl UsageCounterStore for PostgresUsageCounterStore {
    async fn try_consume(
        &self,
        subscription_id: &SubscriptionId,
        n: u64,
    ) -> Result<ConsumeOutcome, DomainError> {
        let amount = to_db_count(n)?;
        let query = format!(
            r#"
            UPDATE {}
            SET consumed_count = consumed_count + $2, last_updated = NOW()
            WHERE subscription_id = $1
              AND NOT archived
              AND period_end > $4
              AND (request_limit IS NULL OR overage = $3 OR consumed_count + $2 <= request_limit)
            RETURNING {COLUMNS}
            "#,
            self.table_name
        );

        for _ in 0..MAX_CONSUME_ATTEMPTS {
            let now = Utc::now();
            let updated = sqlx::query(&query)
                .bind(subscription_id.as_str())
                .bind(amount)
                .bind(overage_label(OveragePolicy::SoftAllow))
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("Failed to increment usage counter", e))?;

            if let Some(row) = updated {
                let counter = counter_from_row(&row)?;
                return Ok(admitted_outcome(&counter));
            }

            // No row matched: either no open period, an ended one, a genuine
            // denial, or the active row was archived between our read and write.
            let Some(mut counter) = self.fetch_active(subscription_id).await? else {
                return Err(DomainError::not_found(format!(
                    "No open usage period for subscription '{}'",
                    subscription_id
                )));
            };

            if counter.has_ended(now) {
                return Err(DomainError::not_found(format!(
                    "Usage period of subscription '{}' ended at {}",
                    subscription_id,
                    counter.period_end()
                )));
            }

            if !counter.policy().allows(counter.consumed_count(), n) {
                return Ok(counter.try_consume(n));
            }
        }

        Err(DomainError::unavailable(format!(
            "Usage counter for subscription '{}' kept changing during increment",
            subscription_id
        )))
    }

    async fn current(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Option<UsageCounter>, DomainError> {
        self.fetch_active(subscription_id).await
    }

    async fn get(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
    ) -> Result<Option<UsageCounter>, DomainError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE subscription_id = $1 AND period_start = $2",
            self.table_name
        );

        let row = sqlx::query(&query)
            .bind(subscription_id.as_str())
            .bind(period_start)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to read usage counter", e))?;

        row.map(|row| counter_from_row(&row)).transpose()
    }

    async fn archived(
        &self,
        subscription_id: &SubscriptionId,
    ) -> Result<Vec<UsageCounter>, DomainError> {
        let query = format!(
            "SELECT {COLUMNS} FROM {} WHERE subscription_id = $1 AND archived ORDER BY period_start",
            self.table_name
        );

        let rows = sqlx::query(&query)
            .bind(subscription_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("Failed to list archived usage counters", e))?;

        rows.iter().map(counter_from_row).collect()
    }

    async fn open_period(
        &self,
        subscription_id: &SubscriptionId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> Result<RolloverOutcome, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("Failed to start rollover transaction", e))?;

        let select = format!(
            "SELECT {COLUMNS} FROM {} WHERE subscription_id = $1 AND NOT archived FOR UPDATE",
            self.table_name
        );

        let current = sqlx::query(&select)
            .bind(subscription_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to lock usage counter", e))?
            .map(|row| counter_from_row(&row))
            .transpose()?;

        let mut archived = None;

        if let Some(mut current) = current {
            if current.period_start() >= period_start {
                return Ok(RolloverOutcome::AlreadyCurrent {
                    period_start: current.period_start(),
                });
            }

            let archived_at = Utc::now();
            let archive = format!(
                "UPDATE {} SET archived = TRUE, archived_at = $3 WHERE subscription_id = $1 AND period_start = $2",
                self.table_name
            );

            sqlx::query(&archive)
                .bind(subscription_id.as_str())
                .bind(current.period_start())
                .bind(archived_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("Failed to archive usage counter", e))?;

            current.archive(archived_at);
            archived = Some(current);
        }

        let counter =
            UsageCounter::open(subscription_id.clone(), period_start, period_end, *policy);
        let policy_json = serde_json::to_value(policy)
            .map_err(|e| DomainError::storage(format!("Failed to serialize quota policy: {}", e)))?;
        let request_limit = policy
            .request_limit()
            .value()
            .map(to_db_count)
            .transpose()?;

        let insert = format!(
            r#"
            INSERT INTO {} (subscription_id, period_start, period_end, consumed_count,
                            request_limit, overage, policy, last_updated)
            VALUES ($1, $2, $3, 0, $4, $5, $6, $7)
            ON CONFLICT (subscription_id, period_start) DO NOTHING
            "#,
            self.table_name
        );

        let inserted = sqlx::query(&insert)
            .bind(subscription_id.as_str())
            .bind(counter.period_start())
            .bind(counter.period_end())
            .bind(request_limit)
            .bind(overage_label(policy.overage()))
            .bind(&policy_json)
            .bind(counter.last_updated())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("Failed to open usage period", e))?;

        if inserted.rows_affected() == 0 {
            // A concurrent opener won the first period for this subscription
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("Failed to roll back rollover", e))?;
            return Ok(RolloverOutcome::AlreadyCurrent { period_start });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("Failed to commit rollover", e))?;

        Ok(RolloverOutcome::Opened { counter, archived })
    }
}

fn admitted_outcome(counter: &UsageCounter) -> ConsumeOutcome {
    let over_quota = counter
        .policy()
        .request_limit()
        .value()
        .is_some_and(|limit| counter.consumed_count() > limit);

    ConsumeOutcome {
        admitted: true,
        consumed: counter.consumed_count(),
        remaining: counter.remaining(),
        over_quota,
        period_start: counter.period_start(),
        period_end: counter.period_end(),
    }
}

fn counter_from_row(row: &PgRow) -> Result<UsageCounter, DomainError> {
    let read_err = |e: sqlx::Error| DomainError::storage(format!("Malformed usage counter row: {}", e));

    let subscription_id: String = row.try_get("subscription_id").map_err(read_err)?;
    let period_start: DateTime<Utc> = row.try_get("period_start").map_err(read_err)?;
    let period_end: DateTime<Utc> = row.try_get("period_end").map_err(read_err)?;
    let consumed: i64 = row.try_get("consumed_count").map_err(read_err)?;
    let policy: serde_json::Value = row.try_get("policy").map_err(read_err)?;
    let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(read_err)?;
    let archived_at: Option<DateTime<Utc>> = row.try_get("archived_at").map_err(read_err)?;

    let subscription_id = SubscriptionId::new(subscription_id)
        .map_err(|e| DomainError::storage(format!("Invalid subscription id in counter row: {}", e)))?;
    let policy: QuotaPolicy = serde_json::from_value(policy)
        .map_err(|e| DomainError::storage(format!("Invalid quota policy in counter row: {}", e)))?;

    Ok(UsageCounter::restore(
        subscription_id,
        period_start,
        period_end,
        u64::try_from(consumed).unwrap_or_default(),
        policy,
        last_updated,
        archived_at,
    ))
}

fn overage_label(overage: OveragePolicy) -> &'static str {
    match overage {
        OveragePolicy::HardDeny => "hard_deny",
        OveragePolicy::SoftAllow => "soft_allow",
    }
}

fn to_db_count(n: u64) -> Result<i64, DomainError> {
    i64::try_from(n).map_err(|_| DomainError::validation(format!("Count {} is out of range", n)))
}
