//! Admission verdicts

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of admitting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Request may proceed
    Allow {
        /// Requests left in the period; `None` when the policy is unlimited
        /// or the quota check was skipped
        remaining: Option<u64>,
        /// Admitted past the limit under a soft-allow policy
        over_quota: bool,
        /// Quota store was unreachable and the request was let through
        under_counted: bool,
    },
    /// Burst limit hit; quota was not touched
    DenyRateLimited {
        #[serde(with = "duration_millis")]
        retry_after: Duration,
    },
    /// Period quota exhausted under a hard-deny policy
    DenyQuotaExceeded { period_end: DateTime<Utc> },
    /// Unknown, revoked or expired key, or a subscription that is not active
    DenyKeyInvalid,
}

impl Verdict {
    pub fn allow(remaining: Option<u64>) -> Self {
        Self::Allow {
            remaining,
            over_quota: false,
            under_counted: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Only rate limiting clears on its own within a short horizon
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DenyRateLimited { .. })
    }

    /// Stable label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow { .. } => "allow",
            Self::DenyRateLimited { .. } => "rate_limited",
            Self::DenyQuotaExceeded { .. } => "quota_exceeded",
            Self::DenyKeyInvalid => "key_invalid",
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u128(duration.as_millis())
    }
}
