use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use staleward_model::{
    GroupRef, HostId, HostKind, HostRecord, ModelError, ReporterStaleness,
    StalenessDeltas, StalenessState, TenantId,
};

use crate::staleness::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LifecycleUpdate,
    BecameStaleNotification,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LifecycleUpdate => "lifecycle_update",
            EventKind::BecameStaleNotification => "became_stale_notification",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformMetadata<'a> {
    pub request_id: Option<&'a str>,
}

/// Engine-owned fields of the `host` object.
#[derive(Debug, Clone, Serialize)]
pub struct HostPayload<'a> {
    pub id: HostId,
    pub org_id: &'a TenantId,
    pub host_kind: HostKind,
    pub reporter: &'a str,
    pub last_check_in: DateTime<Utc>,
    /// Serialized as `[]` when the host has no groups.
    pub groups: &'a [GroupRef],
    pub per_reporter_staleness: &'a BTreeMap<String, ReporterStaleness>,
    pub stale_timestamp: DateTime<Utc>,
    pub stale_warning_timestamp: DateTime<Utc>,
    pub culled_timestamp: DateTime<Utc>,
    pub staleness_state: StalenessState,
}

impl<'a> HostPayload<'a> {
    pub fn new(
        host: &'a HostRecord,
        deltas: &StalenessDeltas,
        now: DateTime<Utc>,
    ) -> Result<Self, ModelError> {
        let stamps = deltas.timestamps(host.last_check_in)?;
        Ok(Self {
            id: host.id,
            org_id: &host.tenant_id,
            host_kind: host.kind,
            reporter: &host.reporter,
            last_check_in: host.last_check_in,
            groups: &host.groups,
            per_reporter_staleness: &host.per_reporter_staleness,
            stale_timestamp: stamps.stale_timestamp,
            stale_warning_timestamp: stamps.stale_warning_timestamp,
            culled_timestamp: stamps.culled_timestamp,
            staleness_state: classify(host.last_check_in, deltas, now),
        })
    }
}

/// Wire event:
/// `{"type", "timestamp", "platform_metadata": {"request_id"}, "host": {..}}`.
#[derive(Debug, Clone)]
pub struct HostEvent<'a> {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub platform_metadata: PlatformMetadata<'a>,
    pub host: HostPayload<'a>,
    /// Opaque profile attributes merged into `host`. Engine fields win on
    /// key collisions.
    pub attributes: &'a serde_json::Map<String, Value>,
}

impl HostEvent<'_> {
    pub fn to_value(&self) -> serde_json::Result<Value> {
        let mut host = match serde_json::to_value(&self.host)? {
            Value::Object(map) => map,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "host payload serialized to {other}, expected an object"
                )));
            }
        };
        for (key, value) in self.attributes {
            host.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let mut event = serde_json::Map::new();
        event.insert("type".into(), serde_json::to_value(self.kind)?);
        event.insert("timestamp".into(), serde_json::to_value(self.timestamp)?);
        event.insert(
            "platform_metadata".into(),
            serde_json::to_value(&self.platform_metadata)?,
        );
        event.insert("host".into(), Value::Object(host));
        Ok(Value::Object(event))
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&self.to_value()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_fields_override_attributes_and_groups_are_never_null() {
        let now = DateTime::from_timestamp(10_000, 0).unwrap();
        let host = HostRecord::new(
            HostId::new(),
            TenantId::new("org-a").unwrap(),
            DateTime::from_timestamp(9_850, 0).unwrap(),
            "puptoo",
        )
        .with_attribute("display_name", "web-01")
        .with_attribute("id", "spoofed");
        let deltas = StalenessDeltas::from_seconds(100, 200, 300).unwrap();

        let event = HostEvent {
            kind: EventKind::BecameStaleNotification,
            timestamp: now,
            platform_metadata: PlatformMetadata { request_id: None },
            host: HostPayload::new(&host, &deltas, now).unwrap(),
            attributes: &host.attributes,
        };
        let value = event.to_value().unwrap();

        assert_eq!(value["type"], "became_stale_notification");
        assert!(value["platform_metadata"]["request_id"].is_null());
        assert_eq!(value["host"]["id"], host.id.to_string());
        assert_eq!(value["host"]["org_id"], "org-a");
        assert_eq!(value["host"]["display_name"], "web-01");
        assert_eq!(value["host"]["groups"], serde_json::json!([]));
        assert_eq!(value["host"]["staleness_state"], "stale");
        assert_eq!(value["host"]["stale_timestamp"], "1970-01-01T02:45:50Z");
    }
}
