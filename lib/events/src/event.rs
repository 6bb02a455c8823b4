//! Integration event records.
//!
//! Every sync run, webhook delivery, outbound API call, and connection
//! failure is captured as an `IntegrationEvent`. Events are immutable once
//! appended to the log; metrics are derived from them after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use switchboard_core::{EventId, IntegrationId};

/// Kind of activity an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A data synchronization run.
    Sync,
    /// An inbound webhook delivery handled by a registered handler.
    Webhook,
    /// An outbound API call through the dispatcher.
    ApiCall,
    /// A connection or configuration failure.
    Error,
    /// A credential refresh.
    AuthRefresh,
}

/// Direction of the traffic that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    /// Traffic arriving from the external service.
    Inbound,
    /// Traffic sent to the external service.
    Outbound,
}

/// Outcome recorded for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The operation completed successfully.
    Success,
    /// The operation failed.
    Failed,
    /// The operation is still in progress.
    Pending,
}

/// Transport-level details attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// The resolved endpoint the call targeted, if any.
    pub endpoint: Option<String>,
    /// HTTP status code of the response, when one was received.
    pub http_status: Option<u16>,
    /// Wall-clock latency of the call in milliseconds.
    pub response_time_ms: Option<u64>,
    /// Additional recorder-specific details.
    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}

impl EventMetadata {
    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the HTTP status code.
    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Sets the response time.
    #[must_use]
    pub fn with_response_time_ms(mut self, millis: u64) -> Self {
        self.response_time_ms = Some(millis);
        self
    }

    /// Adds an extra metadata entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A single record of integration activity.
///
/// Events carry a ULID identifier, so records minted by concurrent writers
/// never collide and sort roughly by creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Unique identifier for this event.
    pub id: EventId,
    /// The integration this event belongs to.
    pub integration_id: IntegrationId,
    /// Kind of activity recorded.
    pub event_type: EventType,
    /// Direction of the traffic.
    pub direction: EventDirection,
    /// Outcome of the operation.
    pub status: EventStatus,
    /// Snapshot of the payload involved, if any.
    pub data: JsonValue,
    /// Error message when the operation failed.
    pub error: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Number of retries performed for this operation.
    ///
    /// Carried for compatibility with downstream consumers; the dispatcher
    /// itself never retries, so this stays at whatever the recorder supplied.
    pub retry_count: u32,
    /// Transport-level details.
    pub metadata: EventMetadata,
}

impl IntegrationEvent {
    /// Creates a new event with a fresh ID and the current timestamp.
    #[must_use]
    pub fn new(
        integration_id: IntegrationId,
        event_type: EventType,
        direction: EventDirection,
        status: EventStatus,
    ) -> Self {
        Self {
            id: EventId::new(),
            integration_id,
            event_type,
            direction,
            status,
            data: JsonValue::Null,
            error: None,
            timestamp: Utc::now(),
            retry_count: 0,
            metadata: EventMetadata::default(),
        }
    }

    /// Sets the payload snapshot.
    #[must_use]
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Sets the transport metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Overrides the recorded timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Returns `true` when the event records a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == EventStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_defaults() {
        let event = IntegrationEvent::new(
            IntegrationId::from("google-calendar"),
            EventType::ApiCall,
            EventDirection::Outbound,
            EventStatus::Success,
        );

        assert_eq!(event.data, JsonValue::Null);
        assert!(event.error.is_none());
        assert_eq!(event.retry_count, 0);
        assert!(event.metadata.endpoint.is_none());
        assert!(!event.is_failure());
    }

    #[test]
    fn builder_sets_fields() {
        let event = IntegrationEvent::new(
            IntegrationId::from("stripe"),
            EventType::Sync,
            EventDirection::Outbound,
            EventStatus::Failed,
        )
        .with_data(serde_json::json!({"direction": "pull"}))
        .with_error("remote unavailable")
        .with_metadata(EventMetadata::default().with_response_time_ms(42));

        assert!(event.is_failure());
        assert_eq!(event.error.as_deref(), Some("remote unavailable"));
        assert_eq!(event.metadata.response_time_ms, Some(42));
        assert_eq!(event.data["direction"], "pull");
    }

    #[test]
    fn event_type_serde_snake_case() {
        let json = serde_json::to_string(&EventType::ApiCall).expect("serialize");
        assert_eq!(json, "\"api_call\"");
        let json = serde_json::to_string(&EventType::AuthRefresh).expect("serialize");
        assert_eq!(json, "\"auth_refresh\"");
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = IntegrationEvent::new(
            IntegrationId::from("hubspot"),
            EventType::Webhook,
            EventDirection::Inbound,
            EventStatus::Success,
        )
        .with_data(serde_json::json!({"event_type": "contact.updated"}))
        .with_metadata(
            EventMetadata::default()
                .with_endpoint("https://api.hubspot.com/webhooks")
                .with_http_status(200),
        );

        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: IntegrationEvent = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.event_type, EventType::Webhook);
        assert_eq!(parsed.metadata.http_status, Some(200));
    }

    #[test]
    fn metadata_extra_flattens() {
        let metadata = EventMetadata::default()
            .with_http_status(429)
            .with_extra("attempt", serde_json::json!(3));

        let json = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(json["http_status"], 429);
        assert_eq!(json["attempt"], 3);
    }
}
