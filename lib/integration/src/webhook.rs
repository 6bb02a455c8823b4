//! Inbound webhook routing.
//!
//! External services deliver webhooks through the embedding application,
//! which hands them to the router. Every handler registered for the
//! integration and event type runs concurrently in its own task with its
//! own deadline, and each appends its own event. A failing, slow, or
//! panicking handler never suppresses its siblings, and nothing a handler
//! does escapes `dispatch`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use switchboard_core::{HandlerId, IntegrationId};
use switchboard_events::{
    EventDirection, EventLog, EventMetadata, EventStatus, EventType, IntegrationEvent,
};
use tokio::task::JoinHandle;

/// Default deadline for a single handler invocation.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure reported by a webhook handler.
///
/// Handler errors never propagate to the webhook source; they are absorbed
/// into failed webhook events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// What went wrong, in the handler's words.
    pub message: String,
}

impl HandlerError {
    /// Creates a handler error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed: {}", self.message)
    }
}

impl std::error::Error for HandlerError {}

/// One inbound webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    /// The integration the webhook belongs to.
    pub integration_id: IntegrationId,
    /// Source-defined event type, e.g. `"contact.updated"`.
    pub event_type: String,
    /// The delivered payload.
    pub payload: JsonValue,
    /// When the router accepted the delivery.
    pub received_at: DateTime<Utc>,
}

/// Reacts to webhook deliveries.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Handles one delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when the delivery could not be processed; the
    /// router records it and moves on.
    async fn handle(&self, delivery: &WebhookDelivery) -> Result<(), HandlerError>;
}

struct HandlerRegistration {
    id: HandlerId,
    integration_id: IntegrationId,
    event_types: HashSet<String>,
    handler: Arc<dyn WebhookHandler>,
}

/// Routes inbound webhooks to registered handlers.
pub struct WebhookRouter {
    handlers: RwLock<Vec<HandlerRegistration>>,
    log: Arc<EventLog>,
    handler_timeout: Duration,
}

impl WebhookRouter {
    /// Creates a router with the default handler deadline.
    #[must_use]
    pub fn new(log: Arc<EventLog>) -> Self {
        Self::with_timeout(log, DEFAULT_HANDLER_TIMEOUT)
    }

    /// Creates a router with a custom handler deadline.
    #[must_use]
    pub fn with_timeout(log: Arc<EventLog>, handler_timeout: Duration) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            log,
            handler_timeout,
        }
    }

    /// Registers a handler for an integration's event types.
    ///
    /// Several handlers may watch the same integration and event type; all
    /// of them run on a matching delivery.
    pub fn register_handler(
        &self,
        integration_id: impl Into<IntegrationId>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
        handler: Arc<dyn WebhookHandler>,
    ) -> HandlerId {
        let id = HandlerId::new();
        let registration = HandlerRegistration {
            id,
            integration_id: integration_id.into(),
            event_types: event_types.into_iter().map(Into::into).collect(),
            handler,
        };
        tracing::info!(
            handler_id = %id,
            integration_id = %registration.integration_id,
            "webhook handler registered"
        );
        self.handlers.write().unwrap().push(registration);
        id
    }

    /// Removes a handler registration.
    ///
    /// Returns `false` when no registration has this ID. An in-flight
    /// invocation finishes normally.
    pub fn remove_handler(&self, handler_id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        let before = handlers.len();
        handlers.retain(|registration| registration.id != handler_id);
        let removed = handlers.len() < before;
        if removed {
            tracing::debug!(handler_id = %handler_id, "webhook handler removed");
        }
        removed
    }

    /// Returns the number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    /// Delivers a webhook to every matching handler.
    ///
    /// Handlers run concurrently, each under the router's deadline, and
    /// each gets its own webhook event in the log. A delivery with no
    /// matching handlers is a quiet no-op. Returns the number of handlers
    /// invoked.
    pub async fn dispatch(
        &self,
        integration_id: &IntegrationId,
        event_type: &str,
        payload: JsonValue,
    ) -> usize {
        let matching: Vec<(HandlerId, Arc<dyn WebhookHandler>)> = {
            let handlers = self.handlers.read().unwrap();
            handlers
                .iter()
                .filter(|registration| {
                    registration.integration_id == *integration_id
                        && registration.event_types.contains(event_type)
                })
                .map(|registration| (registration.id, Arc::clone(&registration.handler)))
                .collect()
        };

        if matching.is_empty() {
            tracing::debug!(
                integration_id = %integration_id,
                event_type,
                "webhook had no matching handlers"
            );
            return 0;
        }

        let delivery = Arc::new(WebhookDelivery {
            integration_id: integration_id.clone(),
            event_type: event_type.to_owned(),
            payload,
            received_at: Utc::now(),
        });

        let invoked = matching.len();
        let timeout = self.handler_timeout;
        let (handler_ids, tasks): (Vec<HandlerId>, Vec<JoinHandle<Result<(), HandlerError>>>) =
            matching
                .into_iter()
                .map(|(handler_id, handler)| {
                    let delivery = Arc::clone(&delivery);
                    let task = tokio::spawn(async move {
                        match tokio::time::timeout(timeout, handler.handle(&delivery)).await {
                            Ok(result) => result,
                            Err(_) => Err(HandlerError::new(format!(
                                "handler timed out after {timeout:?}"
                            ))),
                        }
                    });
                    (handler_id, task)
                })
                .unzip();

        let joined = futures::future::join_all(tasks).await;
        for (handler_id, joined) in handler_ids.into_iter().zip(joined) {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) if join_error.is_panic() => {
                    Err(HandlerError::new("handler panicked"))
                }
                Err(_) => Err(HandlerError::new("handler was cancelled")),
            };

            let status = if result.is_ok() {
                EventStatus::Success
            } else {
                EventStatus::Failed
            };
            let mut event = IntegrationEvent::new(
                delivery.integration_id.clone(),
                EventType::Webhook,
                EventDirection::Inbound,
                status,
            )
            .with_data(serde_json::json!({
                "event_type": delivery.event_type,
                "payload": delivery.payload,
            }))
            .with_metadata(EventMetadata::default().with_extra(
                "handler_id",
                serde_json::json!(handler_id.to_string()),
            ));
            if let Err(error) = &result {
                tracing::warn!(
                    integration_id = %delivery.integration_id,
                    handler_id = %handler_id,
                    event_type = %delivery.event_type,
                    error = %error.message,
                    "webhook handler failed"
                );
                event = event.with_error(error.message.clone());
            }
            self.log.append(event);
        }

        tracing::debug!(
            integration_id = %integration_id,
            event_type,
            invoked,
            "webhook dispatched"
        );
        invoked
    }
}
