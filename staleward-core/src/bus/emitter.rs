use std::fmt;

use chrono::{DateTime, Utc};
use staleward_model::{HostRecord, StalenessDeltas, StalenessState};
use tracing::{debug, warn};

use crate::error::{BusConnectionError, HostEmitError, PublishError};

use super::EventProducer;
use super::event::{EventKind, HostEvent, HostPayload, PlatformMetadata};

/// Per-host result, aggregated into run counters and never persisted.
#[derive(Debug)]
pub enum EmitOutcome {
    Delivered,
    HostFailed(HostEmitError),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The host no longer classifies into any target state at the run's
    /// `now`.
    OutsideTargetStates(StalenessState),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::OutsideTargetStates(state) => {
                write!(f, "host is {state}, outside the target states")
            }
        }
    }
}

/// Destination topic per event kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub events: String,
    pub notifications: String,
}

impl Topics {
    pub fn for_kind(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::LifecycleUpdate => &self.events,
            EventKind::BecameStaleNotification => &self.notifications,
        }
    }
}

/// Serializes and publishes one event per host over an owned producer.
///
/// A rejected message fails only that host. A connection failure poisons
/// the emitter: the current and every later `emit` return
/// [`BusConnectionError`].
pub struct EventEmitter {
    producer: Box<dyn EventProducer>,
    topics: Topics,
    request_id: Option<String>,
    now: DateTime<Utc>,
    lost: Option<String>,
    closed: bool,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("topics", &self.topics)
            .field("request_id", &self.request_id)
            .field("now", &self.now)
            .field("lost", &self.lost)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    pub fn new(
        producer: Box<dyn EventProducer>,
        topics: Topics,
        request_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            producer,
            topics,
            request_id,
            now,
            lost: None,
            closed: false,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.lost.is_none() && !self.closed
    }

    pub async fn emit(
        &mut self,
        host: &HostRecord,
        kind: EventKind,
        deltas: &StalenessDeltas,
    ) -> Result<EmitOutcome, BusConnectionError> {
        if let Some(reason) = &self.lost {
            return Err(BusConnectionError::Lost(reason.clone()));
        }

        let payload = match HostPayload::new(host, deltas, self.now) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    host_id = %host.id,
                    error = %err,
                    "failed to derive staleness timestamps"
                );
                return Ok(EmitOutcome::HostFailed(HostEmitError::Timestamps(
                    err,
                )));
            }
        };
        let event = HostEvent {
            kind,
            timestamp: self.now,
            platform_metadata: PlatformMetadata {
                request_id: self.request_id.as_deref(),
            },
            host: payload,
            attributes: &host.attributes,
        };
        let payload = match event.to_bytes() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(
                    host_id = %host.id,
                    error = %err,
                    "failed to serialize host event"
                );
                return Ok(EmitOutcome::HostFailed(HostEmitError::Serialize(
                    err,
                )));
            }
        };

        let topic = self.topics.for_kind(kind);
        let key = host.id.to_string();
        match self.producer.publish(topic, &key, &payload).await {
            Ok(()) => {
                debug!(
                    host_id = %host.id,
                    topic,
                    event = kind.as_str(),
                    "event delivered"
                );
                Ok(EmitOutcome::Delivered)
            }
            Err(PublishError::Rejected(reason)) => {
                warn!(host_id = %host.id, topic, %reason, "event rejected by bus");
                Ok(EmitOutcome::HostFailed(HostEmitError::Rejected(reason)))
            }
            Err(PublishError::ConnectionUnusable(reason)) => {
                self.lost = Some(reason.clone());
                Err(BusConnectionError::Lost(reason))
            }
        }
    }

    pub async fn flush(&mut self) -> Result<(), BusConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.producer
            .flush()
            .await
            .map_err(|err| BusConnectionError::Flush(err.to_string()))
    }

    /// Closes the producer. Idempotent.
    pub async fn close(&mut self) -> Result<(), BusConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.producer
            .close()
            .await
            .map_err(|err| BusConnectionError::Lost(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockEventProducer;
    use chrono::TimeDelta;
    use mockall::predicate::*;
    use staleward_model::{HostId, TenantId};

    fn topics() -> Topics {
        Topics {
            events: "platform.inventory.events".into(),
            notifications: "platform.notifications.ingress".into(),
        }
    }

    fn host() -> HostRecord {
        HostRecord::new(
            HostId::new(),
            TenantId::new("org-a").unwrap(),
            DateTime::from_timestamp(9_850, 0).unwrap(),
            "puptoo",
        )
    }

    fn deltas() -> StalenessDeltas {
        StalenessDeltas::from_seconds(100, 200, 300).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(10_000, 0).unwrap()
    }

    #[tokio::test]
    async fn publishes_keyed_by_host_id_on_kind_topic() {
        let host = host();
        let key = host.id.to_string();
        let mut producer = MockEventProducer::new();
        producer
            .expect_publish()
            .with(
                eq("platform.notifications.ingress"),
                eq(key.clone()),
                always(),
            )
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut emitter = EventEmitter::new(
            Box::new(producer),
            topics(),
            Some("req-1".into()),
            now(),
        );
        let outcome = emitter
            .emit(&host, EventKind::BecameStaleNotification, &deltas())
            .await
            .unwrap();
        assert!(matches!(outcome, EmitOutcome::Delivered));
    }

    #[tokio::test]
    async fn rejection_fails_only_the_host() {
        let mut producer = MockEventProducer::new();
        producer
            .expect_publish()
            .returning(|_, _, _| Err(PublishError::Rejected("too large".into())));

        let mut emitter =
            EventEmitter::new(Box::new(producer), topics(), None, now());
        let outcome = emitter
            .emit(&host(), EventKind::LifecycleUpdate, &deltas())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EmitOutcome::HostFailed(HostEmitError::Rejected(_))
        ));
        assert!(emitter.is_usable());
    }

    #[tokio::test]
    async fn unrepresentable_timestamps_fail_only_the_host() {
        let mut producer = MockEventProducer::new();
        producer.expect_publish().never();

        // Cull threshold lands past the last representable year.
        let deltas = StalenessDeltas::new(
            TimeDelta::seconds(100),
            TimeDelta::seconds(200),
            TimeDelta::days(262_000 * 366),
        )
        .unwrap();
        let mut emitter =
            EventEmitter::new(Box::new(producer), topics(), None, now());
        let outcome = emitter
            .emit(&host(), EventKind::LifecycleUpdate, &deltas)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            EmitOutcome::HostFailed(HostEmitError::Timestamps(_))
        ));
        assert!(emitter.is_usable());
    }

    #[tokio::test]
    async fn unusable_connection_poisons_the_emitter() {
        let mut producer = MockEventProducer::new();
        producer.expect_publish().times(1).returning(|_, _, _| {
            Err(PublishError::ConnectionUnusable("broken pipe".into()))
        });
        producer.expect_close().times(1).returning(|| Ok(()));

        let mut emitter =
            EventEmitter::new(Box::new(producer), topics(), None, now());
        assert!(
            emitter
                .emit(&host(), EventKind::LifecycleUpdate, &deltas())
                .await
                .is_err()
        );
        // No second publish reaches the producer.
        assert!(
            emitter
                .emit(&host(), EventKind::LifecycleUpdate, &deltas())
                .await
                .is_err()
        );
        emitter.close().await.unwrap();
        emitter.close().await.unwrap();
    }
}
