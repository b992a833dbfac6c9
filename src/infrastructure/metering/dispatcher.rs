//! Usage event dispatcher
//!
//! Admission never waits on event delivery: the gateway pushes events onto
//! an unbounded channel and a background task batches them out to every
//! sink. A batch that fails stays pending for that sink and is retried on
//! the next tick, so delivery is at-least-once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::metering::{UsageEvent, UsageEventSink};
use crate::infrastructure::observability::{
    record_usage_event_failure, record_usage_events_published,
};

/// Batching and retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Flush as soon as this many events are pending
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    /// Per-sink backlog cap; the oldest events are dropped beyond it
    pub max_pending: usize,
    /// Attempts per sink during the final flush on shutdown
    pub shutdown_attempts: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 1_000,
            max_pending: 100_000,
            shutdown_attempts: 3,
        }
    }
}

impl DispatcherConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

/// Cheap, cloneable handle the gateway publishes through
#[derive(Debug, Clone)]
pub struct UsageEventPublisher {
    sender: mpsc::UnboundedSender<UsageEvent>,
}

impl UsageEventPublisher {
    /// Hand an event to the dispatcher without waiting for delivery
    pub fn publish(&self, event: UsageEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!(event_id = %e.0.id, "Usage event dispatcher is closed; event dropped");
        }
    }

    /// A publisher whose events go nowhere, plus the receiver to inspect them
    #[cfg(test)]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<UsageEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

struct SinkQueue {
    sink: Arc<dyn UsageEventSink>,
    pending: VecDeque<UsageEvent>,
    /// False after a failed delivery until a flush succeeds again
    healthy: bool,
}

impl SinkQueue {
    fn new(sink: Arc<dyn UsageEventSink>) -> Self {
        Self {
            sink,
            pending: VecDeque::new(),
            healthy: true,
        }
    }

    /// Deliver pending events in batches; stops at the first failure
    async fn flush(&mut self, batch_size: usize) -> bool {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(batch_size.max(1));
            let batch = &self.pending.make_contiguous()[..take];

            match self.sink.publish(batch).await {
                Ok(()) => {
                    self.pending.drain(..take);
                    self.healthy = true;
                    record_usage_events_published(self.sink.name(), take);
                }
                Err(e) => {
                    self.healthy = false;
                    record_usage_event_failure(self.sink.name());
                    warn!(
                        sink = self.sink.name(),
                        pending = self.pending.len(),
                        error = %e,
                        "Usage event delivery failed; will retry"
                    );
                    return false;
                }
            }
        }

        self.healthy = true;
        true
    }

    fn enqueue(&mut self, event: UsageEvent, max_pending: usize) {
        if self.pending.len() >= max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                warn!(
                    sink = self.sink.name(),
                    event_id = %dropped.id,
                    "Usage event backlog full; dropping oldest event"
                );
            }
        }

        self.pending.push_back(event);
    }
}

/// Background task that owns the sink queues
pub struct UsageEventDispatcher {
    receiver: mpsc::UnboundedReceiver<UsageEvent>,
    queues: Vec<SinkQueue>,
    config: DispatcherConfig,
}

impl UsageEventDispatcher {
    pub fn new(
        sinks: Vec<Arc<dyn UsageEventSink>>,
        config: DispatcherConfig,
    ) -> (Self, UsageEventPublisher) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queues = sinks.into_iter().map(SinkQueue::new).collect();

        (
            Self {
                receiver,
                queues,
                config,
            },
            UsageEventPublisher { sender },
        )
    }

    /// Run until every publisher is dropped or `shutdown` fires, then flush
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.flush_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(sinks = self.queues.len(), "Usage event dispatcher started");

        loop {
            tokio::select! {
                received = self.receiver.recv() => match received {
                    Some(event) => {
                        self.enqueue(event);
                        self.flush_full().await;
                    }
                    None => break,
                },
                _ = ticker.tick() => self.flush().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
    }

    /// Spawn [`run`](Self::run) on the runtime
    pub fn spawn(
        sinks: Vec<Arc<dyn UsageEventSink>>,
        config: DispatcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (UsageEventPublisher, JoinHandle<()>) {
        let (dispatcher, publisher) = Self::new(sinks, config);
        let handle = tokio::spawn(dispatcher.run(shutdown));
        (publisher, handle)
    }

    fn enqueue(&mut self, event: UsageEvent) {
        let max_pending = self.config.max_pending.max(1);

        match self.queues.split_last_mut() {
            Some((last, rest)) => {
                for queue in rest {
                    queue.enqueue(event.clone(), max_pending);
                }
                last.enqueue(event, max_pending);
            }
            None => debug!(event_id = %event.id, "No usage event sinks configured"),
        }
    }

    /// Sinks flush concurrently; a slow sink does not hold up the others
    async fn flush(&mut self) {
        let batch_size = self.config.batch_size;
        join_all(self.queues.iter_mut().map(|queue| queue.flush(batch_size))).await;
    }

    /// Flush queues holding a full batch; a failing sink waits for the ticker
    async fn flush_full(&mut self) {
        let batch_size = self.config.batch_size.max(1);
        join_all(
            self.queues
                .iter_mut()
                .filter(|queue| queue.healthy && queue.pending.len() >= batch_size)
                .map(|queue| queue.flush(batch_size)),
        )
        .await;
    }

    /// Take whatever is still buffered and try hard to deliver it
    async fn drain(&mut self) {
        self.receiver.close();
        while let Ok(event) = self.receiver.try_recv() {
            self.enqueue(event);
        }

        let batch_size = self.config.batch_size;
        let attempts = self.config.shutdown_attempts.max(1);

        for queue in &mut self.queues {
            for attempt in 1..=attempts {
                if queue.flush(batch_size).await {
                    break;
                }
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
                }
            }

            if !queue.pending.is_empty() {
                warn!(
                    sink = queue.sink.name(),
                    lost = queue.pending.len(),
                    "Usage events undelivered at shutdown"
                );
            }
        }

        info!("Usage event dispatcher stopped");
    }
}
