//! Message bus port, event payloads and the per-host emitter.

mod emitter;
mod event;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;

use crate::error::{BusConnectionError, PublishError};

pub use emitter::{EmitOutcome, EventEmitter, SkipReason, Topics};
pub use event::{EventKind, HostEvent, HostPayload, PlatformMetadata};
pub use memory::{MemoryEventBus, PublishedMessage};
#[cfg(feature = "redis")]
pub use self::redis::RedisEventBus;

/// Opens producer connections. One producer is owned by one run.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventProducer>, BusConnectionError>;
}

/// Publishes one message at a time and reports whether the bus accepted it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventProducer: Send {
    async fn publish(
        &mut self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(), PublishError>;

    /// Waits until every accepted message is durable on the bus.
    async fn flush(&mut self) -> Result<(), PublishError>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), PublishError>;
}
