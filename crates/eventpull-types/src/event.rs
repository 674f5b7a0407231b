use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CloudEvents spec version emitted by [`CloudEvent::new`]
pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

// ============================================================================
// CloudEvent - opaque payload carried by the broker
// ============================================================================

/// A CloudEvents 1.0 envelope in its JSON structured form.
///
/// The pipeline never looks inside `data`; only handlers do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    #[serde(default = "default_spec_version")]
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

fn default_spec_version() -> String {
    CLOUD_EVENTS_SPEC_VERSION.to_string()
}

impl CloudEvent {
    /// Create a JSON event with a random id and the current time
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            specversion: default_spec_version(),
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            time: Some(Utc::now()),
            datacontenttype: Some("application/json".to_string()),
            subject: None,
            data: Some(data),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

// ============================================================================
// ReceivedMessage - one delivery, owned until settled
// ============================================================================

/// One delivery of an event, leased to this consumer under `lock_token`.
///
/// The holder must settle the token (acknowledge, release or reject).
/// Unsettled tokens come back once the broker-side lock expires.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub event: CloudEvent,
    pub lock_token: String,
    /// How many times the broker has handed out this event, this delivery included
    pub delivery_count: u32,
}

impl ReceivedMessage {
    pub fn new(event: CloudEvent, lock_token: impl Into<String>) -> Self {
        Self {
            event,
            lock_token: lock_token.into(),
            delivery_count: 1,
        }
    }
}
