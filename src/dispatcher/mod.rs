//! Program Dispatcher
//!
//! After a transaction commits, its event is published to the topic of every
//! active trigger that covers the transaction type. Delivery is
//! at-least-once, retried with exponential backoff, and dead-lettered once
//! the attempts are spent. Nothing here can fail the originating request.
//!
//! Deliveries run on a task tracker owned by the dispatcher. Shutdown calls
//! [`ProgramDispatcher::drain`]; whatever is still undelivered when the grace
//! period ends is dead-lettered rather than dropped.

pub mod backoff;
pub mod dead_letter;
pub mod publisher;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::account::Account;
use crate::store::LedgerStore;
use crate::transaction::Transaction;

pub use backoff::BackoffPolicy;
pub use dead_letter::{DeadLetter, NewDeadLetter};
pub use publisher::{EventPublisher, MemoryPublisher, NatsPublisher, PublishError};

/// Payload published for a committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramEvent {
    pub wallet_id: String,
    pub account_id: String,
    pub user_id: String,
    pub tx_id: i64,
    pub kind: String,
    pub amount: i64,
    pub ts: DateTime<Utc>,
}

impl ProgramEvent {
    pub fn new(wallet_id: &str, account: &Account, tx: &Transaction) -> Self {
        let kind = tx
            .kind()
            .map(|k| k.as_str())
            .unwrap_or_else(|| tx.tx_type.as_str());
        Self {
            wallet_id: wallet_id.to_string(),
            account_id: tx.account_id.clone(),
            user_id: account.user_id.clone(),
            tx_id: tx.id,
            kind: kind.to_string(),
            amount: tx.amount.value(),
            ts: tx.created_at,
        }
    }
}

/// Per-event delivery summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub dead_lettered: Vec<String>,
}

#[derive(Clone)]
pub struct ProgramDispatcher {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn EventPublisher>,
    backoff: BackoffPolicy,
    topic_prefix: String,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

/// Result of [`ProgramDispatcher::drain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Events still in delivery when the grace period ran out
    pub pending: usize,
}

impl ProgramDispatcher {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        publisher: Arc<dyn EventPublisher>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            backoff: BackoffPolicy::default(),
            topic_prefix: topic_prefix.into(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn topic(&self, slug: &str) -> String {
        if self.topic_prefix.is_empty() {
            slug.to_string()
        } else {
            format!("{}.{}", self.topic_prefix, slug)
        }
    }

    /// Deliver in the background; the caller has already committed
    pub fn dispatch(&self, wallet_id: &str, account: &Account, tx: &Transaction) -> JoinHandle<DispatchReport> {
        let this = self.clone();
        let event = ProgramEvent::new(wallet_id, account, tx);
        let tx_type = tx.tx_type;
        self.tasks.spawn(async move { this.deliver(tx_type, &event).await })
    }

    /// Deliveries not yet finished
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait up to `grace` for outstanding deliveries.
    ///
    /// Deliveries still running afterwards stop retrying and dead-letter
    /// every topic they have not reached; the report counts them.
    pub async fn drain(&self, grace: Duration) -> DrainReport {
        self.tasks.close();
        if tokio::time::timeout(grace, self.tasks.wait()).await.is_ok() {
            tracing::info!("Program events drained");
            return DrainReport { pending: 0 };
        }

        let pending = self.tasks.len();
        tracing::warn!(pending, "Grace period expired, dead-lettering undelivered events");
        self.shutdown.cancel();
        // Cancelled deliveries are now only writing their dead letters
        self.tasks.wait().await;
        DrainReport { pending }
    }

    /// Publish `event` to every matching trigger topic
    pub async fn deliver(
        &self,
        tx_type: crate::transaction::TransactionType,
        event: &ProgramEvent,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        let triggers = match self.store.matching_triggers(&event.wallet_id, tx_type).await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::error!(wallet_id = %event.wallet_id, tx_id = event.tx_id, error = %e, "Trigger lookup failed, event dropped");
                return report;
            }
        };

        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(tx_id = event.tx_id, error = %e, "Event encoding failed");
                return report;
            }
        };
        let bytes = payload.to_string().into_bytes();

        for trigger in triggers {
            let topic = self.topic(&trigger.slug);
            match self.publish_with_backoff(&topic, &bytes).await {
                Ok(attempts) => {
                    tracing::debug!(topic = %topic, tx_id = event.tx_id, attempts, "Event published");
                    report.delivered.push(topic);
                }
                Err((error, attempts)) => {
                    tracing::error!(topic = %topic, tx_id = event.tx_id, attempts, error = %error, "Event delivery exhausted, dead-lettering");
                    let letter = NewDeadLetter {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        error: error.to_string(),
                        attempts: attempts as i32,
                    };
                    if let Err(e) = self.store.record_dead_letter(letter).await {
                        tracing::error!(topic = %topic, tx_id = event.tx_id, error = %e, "Dead letter write failed");
                    }
                    report.dead_lettered.push(topic);
                }
            }
        }
        report
    }

    async fn publish_with_backoff(&self, topic: &str, payload: &[u8]) -> Result<u32, (PublishError, u32)> {
        let mut attempt = 1;
        loop {
            let published = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err((PublishError::Shutdown, attempt - 1)),
                published = self.publisher.publish(topic, payload) => published,
            };
            match published {
                Ok(()) => return Ok(attempt),
                Err(e) if attempt >= self.backoff.max_attempts => return Err((e, attempt)),
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(topic, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Publish failed, backing off");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err((e, attempt)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
