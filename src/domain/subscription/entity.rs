//! Subscription entity and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quota::QuotaPolicy;
use crate::domain::storage::{StorageEntity, StorageKey};
use crate::domain::validation::{validate_id, IdValidationError};

/// Subscription identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdValidationError> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self(id))
    }

    /// Fresh identifier of the form `sub-<uuid>`
    pub fn generate() -> Self {
        Self(format!("sub-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = IdValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StorageKey for SubscriptionId {
    fn as_str(&self) -> &str {
        &self.0
    }
}

impl StorageEntity for Subscription {
    type Key = SubscriptionId;

    fn key(&self) -> &Self::Key {
        &self.id
    }
}

/// Lifecycle status of a subscription
///
/// `Active` and `Suspended` may alternate; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Suspended,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;

        matches!(
            (self, next),
            (Active, Suspended) | (Suspended, Active) | (Active, Cancelled) | (Suspended, Cancelled)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A buyer's subscription to an API listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    id: SubscriptionId,
    buyer_id: String,
    listing_id: String,
    policy: QuotaPolicy,
    /// Applied at the next period boundary
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_policy: Option<QuotaPolicy>,
    current_period_start: DateTime<Utc>,
    /// Origin of the period grid; moves only when the period length changes
    billing_anchor: DateTime<Utc>,
    status: SubscriptionStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        buyer_id: impl Into<String>,
        listing_id: impl Into<String>,
        policy: QuotaPolicy,
        period_start: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id,
            buyer_id: buyer_id.into(),
            listing_id: listing_id.into(),
            policy,
            pending_policy: None,
            current_period_start: period_start,
            billing_anchor: period_start,
            status: SubscriptionStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn buyer_id(&self) -> &str {
        &self.buyer_id
    }

    pub fn listing_id(&self) -> &str {
        &self.listing_id
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub fn pending_policy(&self) -> Option<&QuotaPolicy> {
        self.pending_policy.as_ref()
    }

    /// The policy the next period will open with
    pub fn next_period_policy(&self) -> QuotaPolicy {
        self.pending_policy.unwrap_or(self.policy)
    }

    /// Policy a period starting at `period_start` opens with
    pub fn policy_for(&self, period_start: DateTime<Utc>) -> QuotaPolicy {
        if period_start > self.current_period_start {
            self.next_period_policy()
        } else {
            self.policy
        }
    }

    pub fn current_period_start(&self) -> DateTime<Utc> {
        self.current_period_start
    }

    pub fn current_period_end(&self) -> DateTime<Utc> {
        self.period_end_for(self.current_period_start, &self.policy)
    }

    pub fn billing_anchor(&self) -> DateTime<Utc> {
        self.billing_anchor
    }

    /// Start of the period that contains `at` under the active policy
    pub fn period_start_at(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.policy.period_start_at(self.billing_anchor, at)
    }

    /// End of the period starting at `period_start` when it opens with `policy`
    pub fn period_end_for(
        &self,
        period_start: DateTime<Utc>,
        policy: &QuotaPolicy,
    ) -> DateTime<Utc> {
        policy.period_end_at(self.anchor_for(period_start, policy), period_start)
    }

    fn anchor_for(&self, period_start: DateTime<Utc>, policy: &QuotaPolicy) -> DateTime<Utc> {
        if policy.period() == self.policy.period() && period_start >= self.billing_anchor {
            self.billing_anchor
        } else {
            period_start
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub fn transition_to(&mut self, next: SubscriptionStatus) -> Result<(), SubscriptionStatus> {
        if !self.status.can_transition_to(next) {
            return Err(self.status);
        }

        self.status = next;
        self.touch();
        Ok(())
    }

    /// Queue a policy for the next period; the active one stays untouched
    pub fn schedule_policy(&mut self, policy: QuotaPolicy) {
        self.pending_policy = Some(policy);
        self.touch();
    }

    /// Record that the period starting at `period_start` opened with `policy`
    ///
    /// The pending policy is cleared only when it is the one the period
    /// opened with; a policy scheduled after the period opened waits for the
    /// next boundary. Returns false for starts at or before the current one.
    pub fn advance_period(&mut self, period_start: DateTime<Utc>, policy: QuotaPolicy) -> bool {
        if period_start <= self.current_period_start {
            return false;
        }

        self.billing_anchor = self.anchor_for(period_start, &policy);
        if self.pending_policy == Some(policy) {
            self.pending_policy = None;
        }

        self.policy = policy;
        self.current_period_start = period_start;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
