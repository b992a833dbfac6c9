//! Quota policy value object

use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a quota policy is constructed with invalid values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaPolicyError {
    #[error("Request limit must be positive or explicitly unlimited")]
    ZeroRequestLimit,

    #[error("Period length must be positive")]
    ZeroPeriodLength,

    #[error("Period length must not exceed 3660 days or 120 months")]
    PeriodTooLong,
}

const MAX_PERIOD_DAYS: u32 = 3660;
const MAX_PERIOD_MONTHS: u32 = 120;

/// Total requests allowed in one period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestLimit {
    Limited(u64),
    Unlimited,
}

impl RequestLimit {
    /// The numeric limit, `None` when unlimited
    pub fn value(&self) -> Option<u64> {
        match self {
            Self::Limited(limit) => Some(*limit),
            Self::Unlimited => None,
        }
    }
}

/// Length of a billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodLength {
    Days(u32),
    /// Calendar months, clamped to the last day of shorter months
    Months(u32),
}

impl PeriodLength {
    fn is_zero(&self) -> bool {
        matches!(self, Self::Days(0) | Self::Months(0))
    }

    fn is_too_long(&self) -> bool {
        match self {
            Self::Days(days) => *days > MAX_PERIOD_DAYS,
            Self::Months(months) => *months > MAX_PERIOD_MONTHS,
        }
    }
}

impl std::fmt::Display for PeriodLength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{}d", days),
            Self::Months(months) => write!(f, "{}mo", months),
        }
    }
}

/// What happens once the request limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OveragePolicy {
    /// Deny every request past the limit
    #[default]
    HardDeny,
    /// Keep admitting, flagging each request as overage for billing
    SoftAllow,
}

/// Immutable quota rules attached to a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuotaPolicy")]
pub struct QuotaPolicy {
    request_limit: RequestLimit,
    period: PeriodLength,
    overage: OveragePolicy,
}

#[derive(Deserialize)]
struct RawQuotaPolicy {
    request_limit: RequestLimit,
    period: PeriodLength,
    #[serde(default)]
    overage: OveragePolicy,
}

impl TryFrom<RawQuotaPolicy> for QuotaPolicy {
    type Error = QuotaPolicyError;

    fn try_from(raw: RawQuotaPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.request_limit, raw.period, raw.overage)
    }
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            request_limit: RequestLimit::Limited(1000),
            period: PeriodLength::Days(30),
            overage: OveragePolicy::HardDeny,
        }
    }
}

impl QuotaPolicy {
    pub fn new(
        request_limit: RequestLimit,
        period: PeriodLength,
        overage: OveragePolicy,
    ) -> Result<Self, QuotaPolicyError> {
        if request_limit == RequestLimit::Limited(0) {
            return Err(QuotaPolicyError::ZeroRequestLimit);
        }

        if period.is_zero() {
            return Err(QuotaPolicyError::ZeroPeriodLength);
        }

        if period.is_too_long() {
            return Err(QuotaPolicyError::PeriodTooLong);
        }

        Ok(Self {
            request_limit,
            period,
            overage,
        })
    }

    /// Hard-deny policy with a fixed request limit over a number of days
    pub fn limited(limit: u64, days: u32) -> Result<Self, QuotaPolicyError> {
        Self::new(
            RequestLimit::Limited(limit),
            PeriodLength::Days(days),
            OveragePolicy::HardDeny,
        )
    }

    pub fn unlimited(period: PeriodLength) -> Result<Self, QuotaPolicyError> {
        Self::new(RequestLimit::Unlimited, period, OveragePolicy::HardDeny)
    }

    pub fn with_overage(mut self, overage: OveragePolicy) -> Self {
        self.overage = overage;
        self
    }

    pub fn request_limit(&self) -> RequestLimit {
        self.request_limit
    }

    pub fn period(&self) -> PeriodLength {
        self.period
    }

    pub fn overage(&self) -> OveragePolicy {
        self.overage
    }

    /// True when no further request fits under the limit
    pub fn is_exhausted(&self, consumed: u64) -> bool {
        match self.request_limit {
            RequestLimit::Limited(limit) => consumed >= limit,
            RequestLimit::Unlimited => false,
        }
    }

    /// Whether `n` more requests may be admitted on top of `consumed`
    ///
    /// Soft-allow policies always admit; the caller flags the overage.
    pub fn allows(&self, consumed: u64, n: u64) -> bool {
        match (self.request_limit, self.overage) {
            (RequestLimit::Unlimited, _) | (_, OveragePolicy::SoftAllow) => true,
            (RequestLimit::Limited(limit), OveragePolicy::HardDeny) => {
                consumed.saturating_add(n) <= limit
            }
        }
    }

    /// Requests left in the period, `None` when unlimited
    pub fn remaining(&self, consumed: u64) -> Option<u64> {
        self.request_limit
            .value()
            .map(|limit| limit.saturating_sub(consumed))
    }

    /// Share of the limit used, in percent; `None` when unlimited
    pub fn usage_percent(&self, consumed: u64) -> Option<f64> {
        self.request_limit
            .value()
            .map(|limit| consumed as f64 / limit as f64 * 100.0)
    }

    /// Start of the period following the one that began at `current`
    ///
    /// Saturates at the end of the representable calendar.
    pub fn next_period_start(&self, current: DateTime<Utc>) -> DateTime<Utc> {
        self.nth_period_start(current, 1)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Start of the period that contains `at`, counting from `anchor`
    ///
    /// Month periods are always `anchor + k months`, so a day clamped in a
    /// short month does not shift later periods. Returns `anchor` itself when
    /// `at` precedes it.
    pub fn period_start_at(&self, anchor: DateTime<Utc>, at: DateTime<Utc>) -> DateTime<Utc> {
        self.nth_period_start(anchor, self.period_index_at(anchor, at))
            .unwrap_or(anchor)
    }

    /// End of the period that contains `at`, counting from `anchor`
    pub fn period_end_at(&self, anchor: DateTime<Utc>, at: DateTime<Utc>) -> DateTime<Utc> {
        self.period_index_at(anchor, at)
            .checked_add(1)
            .and_then(|next| self.nth_period_start(anchor, next))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// `None` once the result leaves chrono's range
    fn nth_period_start(&self, anchor: DateTime<Utc>, index: u32) -> Option<DateTime<Utc>> {
        match self.period {
            PeriodLength::Days(days) => {
                let span = Duration::try_days(i64::from(days) * i64::from(index))?;
                anchor.checked_add_signed(span)
            }
            PeriodLength::Months(months) => {
                anchor.checked_add_months(Months::new(months.checked_mul(index)?))
            }
        }
    }

    fn period_index_at(&self, anchor: DateTime<Utc>, at: DateTime<Utc>) -> u32 {
        if at <= anchor {
            return 0;
        }

        let estimate = match self.period {
            PeriodLength::Days(days) => (at - anchor).num_days() / i64::from(days),
            PeriodLength::Months(months) => {
                let elapsed = i64::from(at.year() - anchor.year()) * 12
                    + i64::from(at.month())
                    - i64::from(anchor.month());
                elapsed / i64::from(months)
            }
        };

        // The estimate is off by at most one period either way
        let mut index = u32::try_from(estimate.max(0)).unwrap_or(u32::MAX);

        while index > 0
            && self
                .nth_period_start(anchor, index)
                .is_none_or(|start| start > at)
        {
            index -= 1;
        }

        while let Some(next) = index.checked_add(1) {
            match self.nth_period_start(anchor, next) {
                Some(start) if start <= at => index = next,
                _ => break,
            }
        }

        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        assert_eq!(
            QuotaPolicy::limited(0, 30),
            Err(QuotaPolicyError::ZeroRequestLimit)
        );
        assert_eq!(
            QuotaPolicy::limited(10, 0),
            Err(QuotaPolicyError::ZeroPeriodLength)
        );
        assert_eq!(
            QuotaPolicy::unlimited(PeriodLength::Months(0)),
            Err(QuotaPolicyError::ZeroPeriodLength)
        );
        assert!(QuotaPolicy::unlimited(PeriodLength::Months(1)).is_ok());
    }

    #[test]
    fn test_validation_rejects_oversized_period() {
        assert_eq!(
            QuotaPolicy::limited(10, 3661),
            Err(QuotaPolicyError::PeriodTooLong)
        );
        assert_eq!(
            QuotaPolicy::unlimited(PeriodLength::Months(121)),
            Err(QuotaPolicyError::PeriodTooLong)
        );
        assert!(QuotaPolicy::limited(10, 3660).is_ok());

        let huge = serde_json::from_str::<QuotaPolicy>(
            r#"{"request_limit":{"limited":10},"period":{"days":4294967295}}"#,
        );
        assert!(huge.is_err());
    }

    #[test]
    fn test_period_math_saturates_at_calendar_end() {
        let policy = QuotaPolicy::limited(10, 3660).unwrap();
        let late = DateTime::<Utc>::MAX_UTC - Duration::days(10);

        assert_eq!(policy.next_period_start(late), DateTime::<Utc>::MAX_UTC);
        assert_eq!(policy.period_start_at(late, DateTime::<Utc>::MAX_UTC), late);
        assert_eq!(
            policy.period_end_at(late, DateTime::<Utc>::MAX_UTC),
            DateTime::<Utc>::MAX_UTC
        );

        let monthly = QuotaPolicy::unlimited(PeriodLength::Months(120)).unwrap();
        assert_eq!(monthly.next_period_start(late), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: QuotaPolicy = serde_json::from_str(
            r#"{"request_limit":{"limited":100},"period":{"days":30},"overage":"soft_allow"}"#,
        )
        .unwrap();
        assert_eq!(ok.request_limit(), RequestLimit::Limited(100));
        assert_eq!(ok.overage(), OveragePolicy::SoftAllow);

        let unlimited: QuotaPolicy =
            serde_json::from_str(r#"{"request_limit":"unlimited","period":{"months":1}}"#).unwrap();
        assert_eq!(unlimited.overage(), OveragePolicy::HardDeny);

        let zero = serde_json::from_str::<QuotaPolicy>(
            r#"{"request_limit":{"limited":0},"period":{"days":30}}"#,
        );
        assert!(zero.is_err());
    }

    #[test]
    fn test_exhaustion_and_remaining() {
        let policy = QuotaPolicy::limited(100, 30).unwrap();

        assert!(!policy.is_exhausted(99));
        assert!(policy.is_exhausted(100));
        assert_eq!(policy.remaining(40), Some(60));
        assert_eq!(policy.remaining(150), Some(0));
        assert_eq!(policy.usage_percent(25), Some(25.0));

        assert!(policy.allows(99, 1));
        assert!(!policy.allows(99, 2));
        assert!(!policy.allows(100, 1));
    }

    #[test]
    fn test_soft_allow_and_unlimited_always_allow() {
        let soft = QuotaPolicy::limited(10, 30)
            .unwrap()
            .with_overage(OveragePolicy::SoftAllow);
        assert!(soft.allows(10, 1));
        assert!(soft.is_exhausted(10));

        let unlimited = QuotaPolicy::unlimited(PeriodLength::Days(1)).unwrap();
        assert!(unlimited.allows(u64::MAX, 1));
        assert!(!unlimited.is_exhausted(u64::MAX));
        assert_eq!(unlimited.remaining(5), None);
        assert_eq!(unlimited.usage_percent(5), None);
    }

    #[test]
    fn test_next_period_start_days() {
        let policy = QuotaPolicy::limited(100, 30).unwrap();
        assert_eq!(policy.next_period_start(at(2026, 1, 1)), at(2026, 1, 31));
    }

    #[test]
    fn test_next_period_start_months_clamps() {
        let policy = QuotaPolicy::new(
            RequestLimit::Limited(100),
            PeriodLength::Months(1),
            OveragePolicy::HardDeny,
        )
        .unwrap();

        assert_eq!(policy.next_period_start(at(2026, 1, 31)), at(2026, 2, 28));
        assert_eq!(policy.next_period_start(at(2026, 3, 1)), at(2026, 4, 1));
    }

    #[test]
    fn test_period_start_at() {
        let policy = QuotaPolicy::limited(100, 10).unwrap();
        let anchor = at(2026, 1, 1);

        assert_eq!(policy.period_start_at(anchor, at(2026, 1, 5)), anchor);
        assert_eq!(policy.period_start_at(anchor, at(2026, 1, 11)), at(2026, 1, 11));
        assert_eq!(policy.period_start_at(anchor, at(2026, 1, 25)), at(2026, 1, 21));
        assert_eq!(policy.period_start_at(anchor, at(2025, 12, 1)), anchor);
        assert_eq!(policy.period_end_at(anchor, at(2026, 1, 25)), at(2026, 1, 31));
        assert_eq!(policy.period_start_at(anchor, at(2026, 1, 21)), at(2026, 1, 21));
    }

    #[test]
    fn test_monthly_periods_keep_anchor_day() {
        let policy = QuotaPolicy::unlimited(PeriodLength::Months(1)).unwrap();
        let anchor = at(2026, 1, 31);

        assert_eq!(policy.period_start_at(anchor, at(2026, 3, 1)), at(2026, 2, 28));
        assert_eq!(policy.period_end_at(anchor, at(2026, 3, 1)), at(2026, 3, 31));
        assert_eq!(policy.period_start_at(anchor, at(2026, 4, 15)), at(2026, 3, 31));
        assert_eq!(policy.period_start_at(anchor, at(2027, 1, 31)), at(2027, 1, 31));
        assert_eq!(policy.period_start_at(anchor, at(2027, 1, 30)), at(2026, 12, 31));
    }

    #[test]
    fn test_period_start_at_far_from_anchor() {
        let policy = QuotaPolicy::limited(10, 1).unwrap();
        let anchor = at(2000, 1, 1);

        assert_eq!(
            policy.period_start_at(anchor, at(2026, 6, 15) + Duration::hours(5)),
            at(2026, 6, 15)
        );
    }
}
