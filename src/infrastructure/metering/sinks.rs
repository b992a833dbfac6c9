//! Built-in usage event sinks

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::api_key::{ApiKeyId, ApiKeyRepository};
use crate::domain::metering::{UsageEvent, UsageEventSink};
use crate::domain::DomainError;

/// Writes each event as a structured log line under the `usage_events` target
///
/// Lets a log pipeline feed billing without any extra wiring.
#[derive(Debug, Default)]
pub struct LoggingUsageEventSink;

#[async_trait]
impl UsageEventSink for LoggingUsageEventSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, events: &[UsageEvent]) -> Result<(), DomainError> {
        for event in events {
            info!(
                target: "usage_events",
                event_id = %event.id,
                api_key_id = %event.api_key_id,
                subscription_id = %event.subscription_id,
                period_start = ?event.period_start,
                occurred_at = %event.occurred_at,
                under_counted = event.under_counted,
                over_quota = event.over_quota,
                "usage"
            );
        }
        Ok(())
    }
}

/// Keeps every distinct event in memory, deduplicated on the event id
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryUsageEventLog {
    inner: std::sync::RwLock<EventLog>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct EventLog {
    seen: std::collections::HashSet<uuid::Uuid>,
    events: Vec<UsageEvent>,
}

#[cfg(test)]
impl InMemoryUsageEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.inner
            .read()
            .map(|log| log.events.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|log| log.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[async_trait]
impl UsageEventSink for InMemoryUsageEventLog {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(&self, events: &[UsageEvent]) -> Result<(), DomainError> {
        let mut log = self
            .inner
            .write()
            .map_err(|e| DomainError::internal(format!("Event log lock poisoned: {}", e)))?;

        for event in events {
            if log.seen.insert(event.id) {
                log.events.push(event.clone());
            }
        }

        Ok(())
    }
}

/// Stamps `last_used_at` on the keys that appear in a batch
#[derive(Debug)]
pub struct ApiKeyActivityRecorder {
    repository: Arc<dyn ApiKeyRepository>,
}

impl ApiKeyActivityRecorder {
    pub fn new(repository: Arc<dyn ApiKeyRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl UsageEventSink for ApiKeyActivityRecorder {
    fn name(&self) -> &'static str {
        "api_key_activity"
    }

    async fn publish(&self, events: &[UsageEvent]) -> Result<(), DomainError> {
        let mut latest: HashMap<&ApiKeyId, DateTime<Utc>> = HashMap::new();

        for event in events {
            latest
                .entry(&event.api_key_id)
                .and_modify(|at| *at = (*at).max(event.occurred_at))
                .or_insert(event.occurred_at);
        }

        for (api_key_id, at) in latest {
            match self.repository.record_usage(api_key_id, at).await {
                Ok(()) | Err(DomainError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api_key::ApiKey;
    use crate::domain::subscription::SubscriptionId;
    use crate::infrastructure::api_key::StorageApiKeyRepository;
    use crate::infrastructure::storage::InMemoryStorage;

    fn event(key: &str) -> UsageEvent {
        UsageEvent::new(
            ApiKeyId::new(key).unwrap(),
            SubscriptionId::new("sub-1").unwrap(),
            None,
        )
    }

    #[tokio::test]
    async fn test_event_log_deduplicates_redelivery() {
        let log = InMemoryUsageEventLog::new();
        let first = event("key-1");
        let second = event("key-1");

        log.publish(&[first.clone(), second.clone()]).await.unwrap();
        log.publish(&[first.clone()]).await.unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0].id, first.id);
    }

    #[tokio::test]
    async fn test_activity_recorder_stamps_latest_use() {
        let repository = Arc::new(StorageApiKeyRepository::new(Arc::new(
            InMemoryStorage::<ApiKey>::new(),
        )));
        let key = ApiKey::new(
            ApiKeyId::new("key-1").unwrap(),
            SubscriptionId::new("sub-1").unwrap(),
            "Production",
            "sha256$x",
            "veil_sk_abcdefgh",
        );
        repository.create(key).await.unwrap();

        let recorder = ApiKeyActivityRecorder::new(repository.clone());
        let mut older = event("key-1");
        older.occurred_at = Utc::now() - chrono::Duration::minutes(10);
        let newer = event("key-1");

        recorder
            .publish(&[newer.clone(), older, event("key-404")])
            .await
            .unwrap();

        let stored = repository
            .get(&ApiKeyId::new("key-1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_used_at(), Some(newer.occurred_at));
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_everything() {
        let sink = LoggingUsageEventSink;
        assert!(sink.publish(&[event("key-1")]).await.is_ok());
    }
}
