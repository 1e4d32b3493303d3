use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{BusConnectionError, PublishError};

use super::{EventBus, EventProducer};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

/// In-process bus that records what was published. Rejections and
/// connection loss can be scripted for tests.
#[derive(Clone, Default)]
pub struct MemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

#[derive(Debug, Default)]
struct BusState {
    published: Vec<PublishedMessage>,
    reject_keys: BTreeSet<String>,
    fail_after: Option<usize>,
    fail_connect: bool,
    fail_flush: bool,
    attempts: usize,
    connections: usize,
    flushes: usize,
    closes: usize,
}

impl fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryEventBus");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("published", &state.published.len())
                    .field("connections", &state.connections)
                    .field("closes", &state.closes);
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().await.published.clone()
    }

    /// Reject every message published with `key`.
    pub async fn reject_key(&self, key: impl Into<String>) {
        self.state.lock().await.reject_keys.insert(key.into());
    }

    /// Accept `n` publish attempts, then report the connection unusable.
    pub async fn fail_after(&self, n: usize) {
        self.state.lock().await.fail_after = Some(n);
    }

    pub async fn fail_connect(&self, fail: bool) {
        self.state.lock().await.fail_connect = fail;
    }

    pub async fn fail_flush(&self, fail: bool) {
        self.state.lock().await.fail_flush = fail;
    }

    pub async fn connections(&self) -> usize {
        self.state.lock().await.connections
    }

    pub async fn flushes(&self) -> usize {
        self.state.lock().await.flushes
    }

    pub async fn closes(&self) -> usize {
        self.state.lock().await.closes
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn connect(&self) -> Result<Box<dyn EventProducer>, BusConnectionError> {
        let mut state = self.state.lock().await;
        if state.fail_connect {
            return Err(BusConnectionError::Connect(
                "memory bus configured to refuse connections".into(),
            ));
        }
        state.connections += 1;
        Ok(Box::new(MemoryProducer {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryProducer {
    state: Arc<Mutex<BusState>>,
    closed: bool,
}

#[async_trait]
impl EventProducer for MemoryProducer {
    async fn publish(
        &mut self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError> {
        if self.closed {
            return Err(PublishError::ConnectionUnusable(
                "producer closed".into(),
            ));
        }
        let mut state = self.state.lock().await;
        if state.fail_after.is_some_and(|limit| state.attempts >= limit) {
            return Err(PublishError::ConnectionUnusable(
                "connection reset by peer".into(),
            ));
        }
        state.attempts += 1;
        if state.reject_keys.contains(key) {
            return Err(PublishError::Rejected(format!(
                "message for key {key} rejected"
            )));
        }
        let payload = serde_json::from_slice(payload)
            .map_err(|err| PublishError::Rejected(err.to_string()))?;
        state.published.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        state.flushes += 1;
        if state.fail_flush {
            return Err(PublishError::ConnectionUnusable(
                "flush timed out".into(),
            ));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PublishError> {
        if !self.closed {
            self.closed = true;
            self.state.lock().await.closes += 1;
        }
        Ok(())
    }
}
