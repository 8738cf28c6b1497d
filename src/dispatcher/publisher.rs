//! Event bus publishers

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Event bus connection failed: {0}")]
    Connect(String),

    #[error("Publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Shut down before delivery")]
    Shutdown,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

// ============================================================================
// NATS
// ============================================================================

pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    /// Connect to any of the given broker addresses
    pub async fn connect(brokers: &[String]) -> Result<Self, PublishError> {
        if brokers.is_empty() {
            return Err(PublishError::Connect("no broker address configured".to_string()));
        }
        let addrs = brokers.join(",");
        let client = async_nats::connect(addrs.as_str())
            .await
            .map_err(|e| PublishError::Connect(e.to_string()))?;
        tracing::info!(brokers = %addrs, "Connected to event bus");
        Ok(Self { client })
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let fail = |e: String| PublishError::Publish {
            topic: topic.to_string(),
            message: e,
        };
        self.client
            .publish(topic.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| fail(e.to_string()))?;
        self.client.flush().await.map_err(|e| fail(e.to_string()))
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Records published events; can be told to fail the first N publishes
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
    failures_left: AtomicU32,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(failures: u32) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(failures),
        }
    }

    pub async fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PublishError::Publish {
                topic: topic.to_string(),
                message: "simulated outage".to_string(),
            });
        }
        let value = serde_json::from_slice(payload).map_err(|e| PublishError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        })?;
        self.published.lock().await.push((topic.to_string(), value));
        Ok(())
    }
}
