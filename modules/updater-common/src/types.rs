use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Addresses one recomputation: an engagement, the person who owns it, and
/// the time of the change that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityReference {
    engagement: Uuid,
    person: Uuid,
    time: DateTime<Utc>,
}

impl EntityReference {
    pub fn new(engagement: Uuid, person: Uuid, time: DateTime<Utc>) -> Self {
        Self {
            engagement,
            person,
            time,
        }
    }

    pub fn engagement(&self) -> Uuid {
        self.engagement
    }

    pub fn person(&self) -> Uuid {
        self.person
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Body of a change notification as published on the bus.
///
/// `uuid` is the person, `object_uuid` the engagement. Publishers emit
/// naive timestamps; they are read as UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub uuid: Uuid,
    pub object_uuid: Uuid,
    #[serde(deserialize_with = "deserialize_time")]
    pub time: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }
}

impl From<NotificationPayload> for EntityReference {
    fn from(payload: NotificationPayload) -> Self {
        EntityReference::new(payload.object_uuid, payload.uuid, payload.time)
    }
}

impl From<&EntityReference> for NotificationPayload {
    fn from(reference: &EntityReference) -> Self {
        Self {
            uuid: reference.person,
            object_uuid: reference.engagement,
            time: reference.time,
        }
    }
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(time) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}
