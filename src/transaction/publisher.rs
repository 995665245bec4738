// Publisher - Pushes pruned payloads to the nodes hosting recipient keys

use crate::identity::PublicKey;
use crate::payload::EncodedPayload;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Errors from publishing a payload to one recipient
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The recipient's node refused the connection
    #[error("Node {0} is offline")]
    NodeOffline(String),

    #[error("Unable to push payload: {0}")]
    PublishFailed(String),

    /// No node is known to host the key
    #[error("Recipient not found for key: {0}")]
    KeyNotFound(PublicKey),
}

// ============================================================================
// PAYLOAD PUBLISHER TRAIT
// ============================================================================

/// Delivers a payload to the node that hosts `recipient`
#[async_trait]
pub trait PayloadPublisher: Send + Sync {
    async fn publish_payload(&self, payload: &EncodedPayload, recipient: &PublicKey) -> Result<(), PublishError>;
}

// ============================================================================
// MOCK PUBLISHER
// ============================================================================

/// In-memory publisher that records deliveries, for testing
#[derive(Default)]
pub struct MockPayloadPublisher {
    published: Mutex<Vec<(PublicKey, EncodedPayload)>>,
    offline: HashSet<PublicKey>,
    failing: HashSet<PublicKey>,
    delay_ms: u64,
    call_count: AtomicUsize,
}

impl MockPayloadPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recipients whose node reports as offline
    pub fn with_offline(mut self, key: PublicKey) -> Self {
        self.offline.insert(key);
        self
    }

    /// Recipients whose push fails with a generic error
    pub fn with_failure(mut self, key: PublicKey) -> Self {
        self.failing.insert(key);
        self
    }

    /// Add a delay before every delivery
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Every successful delivery so far, in completion order
    pub fn published(&self) -> Vec<(PublicKey, EncodedPayload)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Payloads delivered to one recipient
    pub fn published_to(&self, key: &PublicKey) -> Vec<EncodedPayload> {
        self.published()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, p)| p)
            .collect()
    }

    /// Number of delivery attempts, successful or not
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadPublisher for MockPayloadPublisher {
    async fn publish_payload(&self, payload: &EncodedPayload, recipient: &PublicKey) -> Result<(), PublishError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.offline.contains(recipient) {
            return Err(PublishError::NodeOffline(format!("mock://{}", recipient)));
        }
        if self.failing.contains(recipient) {
            return Err(PublishError::PublishFailed("Mock failure".to_string()));
        }

        if let Ok(mut published) = self.published.lock() {
            published.push((*recipient, payload.clone()));
        }
        Ok(())
    }
}
