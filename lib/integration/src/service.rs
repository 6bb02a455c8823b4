//! One front door for the integration subsystem.
//!
//! `IntegrationService` wires the registry, dispatcher, webhook router,
//! sync orchestrator, and event log together and owns the flows that span
//! more than one of them: registration runs a connection test before an
//! integration goes live, and credential refreshes are recorded as auth
//! events. Everything else delegates to the owning component.

use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{HandlerId, IntegrationId};
use switchboard_events::{
    DEFAULT_CAPACITY, EventDirection, EventLog, EventStatus, EventType, IntegrationEvent,
    IntegrationMetrics, MetricsTimeframe,
};

use crate::config::{
    Credentials, IntegrationCategory, IntegrationConfig, IntegrationStatus, UpdateIntegration,
};
use crate::dispatcher::{ApiCall, ApiDispatcher};
use crate::error::{ConfigurationError, DispatchError};
use crate::registry::IntegrationRegistry;
use crate::sync::{SyncAdapter, SyncDirection, SyncOrchestrator, SyncOutcome};
use crate::transport::{Transport, TransportResponse};
use crate::webhook::{DEFAULT_HANDLER_TIMEOUT, WebhookHandler, WebhookRouter};

/// Endpoint probed by connection tests, resolved against the
/// integration's base endpoint.
const CONNECTION_TEST_ENDPOINT: &str = "/health";

/// Tunables for [`IntegrationService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How many events the log retains before evicting the oldest.
    pub event_log_capacity: usize,
    /// Deadline for a single webhook handler invocation.
    pub webhook_handler_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: DEFAULT_CAPACITY,
            webhook_handler_timeout: DEFAULT_HANDLER_TIMEOUT,
        }
    }
}

/// The integration subsystem behind one handle.
///
/// Construct it inside a Tokio runtime; the event log spawns its drain
/// task immediately. The service is cheap to share behind an [`Arc`] and
/// every method takes `&self`.
pub struct IntegrationService {
    registry: Arc<IntegrationRegistry>,
    log: Arc<EventLog>,
    dispatcher: Arc<ApiDispatcher>,
    router: WebhookRouter,
    orchestrator: SyncOrchestrator,
}

impl IntegrationService {
    /// Creates a service over the given transport with default tunables.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ServiceConfig::default())
    }

    /// Creates a service with explicit tunables.
    #[must_use]
    pub fn with_config(transport: Arc<dyn Transport>, config: ServiceConfig) -> Self {
        let registry = Arc::new(IntegrationRegistry::new());
        let log = Arc::new(EventLog::with_capacity(config.event_log_capacity));
        let dispatcher = Arc::new(ApiDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&log),
            transport,
        ));
        let router = WebhookRouter::with_timeout(Arc::clone(&log), config.webhook_handler_timeout);
        let orchestrator = SyncOrchestrator::new(Arc::clone(&registry), Arc::clone(&log));
        Self {
            registry,
            log,
            dispatcher,
            router,
            orchestrator,
        }
    }

    /// The dispatcher behind this service, for callers that need to wire
    /// it into something else, such as an endpoint-backed sync adapter.
    #[must_use]
    pub fn dispatcher(&self) -> Arc<ApiDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Registers an integration and tests its connection.
    ///
    /// The stored integration starts out pending, then moves to active or
    /// error depending on how the connection test went. The returned
    /// snapshot reflects the resolved status.
    ///
    /// # Errors
    ///
    /// Returns an error when the ID is already taken or the base endpoint
    /// is missing.
    pub async fn register(
        &self,
        config: IntegrationConfig,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        let registered = self.registry.register(config)?;
        self.test_connection(&registered.id).await?;
        Ok(self.registry.get(&registered.id).unwrap_or(registered))
    }

    /// Probes the integration's health endpoint and updates its status.
    ///
    /// A 2xx answer marks the integration active. Anything else, including
    /// a rate-limited probe, marks it errored and records an error event.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotFound`] when the integration is
    /// not registered.
    pub async fn test_connection(
        &self,
        integration_id: &IntegrationId,
    ) -> Result<IntegrationStatus, ConfigurationError> {
        let probe = self
            .dispatcher
            .call(integration_id, ApiCall::get(CONNECTION_TEST_ENDPOINT))
            .await;

        let status = match probe {
            Ok(response) if response.is_success() => IntegrationStatus::Active,
            Ok(response) => {
                self.record_connection_failure(
                    integration_id,
                    format!("connection test returned HTTP {}", response.status),
                );
                IntegrationStatus::Error
            }
            Err(DispatchError::Configuration(error)) => return Err(error),
            Err(error) => {
                self.record_connection_failure(integration_id, error.to_string());
                IntegrationStatus::Error
            }
        };

        self.registry.set_status(integration_id, status)?;
        tracing::info!(
            integration_id = %integration_id,
            status = ?status,
            "connection test finished"
        );
        Ok(status)
    }

    /// Merges fresh credential material into an integration and records
    /// an auth refresh event.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotFound`] when the integration is
    /// not registered.
    pub fn refresh_credentials(
        &self,
        integration_id: &IntegrationId,
        credentials: Credentials,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        let updated = self.registry.merge_credentials(integration_id, credentials)?;
        self.log.append(
            IntegrationEvent::new(
                integration_id.clone(),
                EventType::AuthRefresh,
                EventDirection::Outbound,
                EventStatus::Success,
            )
            .with_data(json!({ "operation": "credential_refresh" })),
        );
        tracing::info!(integration_id = %integration_id, "credentials refreshed");
        Ok(updated)
    }

    /// Applies a partial update to an integration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotFound`] when the integration is
    /// not registered.
    pub fn update(
        &self,
        integration_id: &IntegrationId,
        update: UpdateIntegration,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        self.registry.update(integration_id, update)
    }

    /// Returns a snapshot of an integration.
    #[must_use]
    pub fn get(&self, integration_id: &IntegrationId) -> Option<IntegrationConfig> {
        self.registry.get(integration_id)
    }

    /// Returns snapshots of all integrations, optionally filtered by
    /// category, in registration order.
    #[must_use]
    pub fn list(&self, category: Option<IntegrationCategory>) -> Vec<IntegrationConfig> {
        self.registry.list(category)
    }

    /// Sends an authenticated API call through an integration.
    ///
    /// # Errors
    ///
    /// Returns an error when the integration is unknown, the call was
    /// rate limited, or the transport failed. An HTTP error status is a
    /// successful dispatch; inspect the response.
    pub async fn call(
        &self,
        integration_id: &IntegrationId,
        call: ApiCall,
    ) -> Result<TransportResponse, DispatchError> {
        self.dispatcher.call(integration_id, call).await
    }

    /// Registers a webhook handler for an integration's event types.
    pub fn register_handler(
        &self,
        integration_id: impl Into<IntegrationId>,
        event_types: impl IntoIterator<Item = impl Into<String>>,
        handler: Arc<dyn WebhookHandler>,
    ) -> HandlerId {
        self.router.register_handler(integration_id, event_types, handler)
    }

    /// Removes a webhook handler registration.
    pub fn remove_handler(&self, handler_id: HandlerId) -> bool {
        self.router.remove_handler(handler_id)
    }

    /// Routes an inbound webhook to every matching handler and returns
    /// how many ran.
    pub async fn handle_webhook(
        &self,
        integration_id: &IntegrationId,
        event_type: &str,
        payload: JsonValue,
    ) -> usize {
        self.router.dispatch(integration_id, event_type, payload).await
    }

    /// Binds the adapter that moves data for an integration.
    pub fn register_sync_adapter(
        &self,
        integration_id: impl Into<IntegrationId>,
        adapter: Arc<dyn SyncAdapter>,
    ) {
        self.orchestrator.register_adapter(integration_id, adapter);
    }

    /// Runs one sync for an integration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotFound`] when the integration is
    /// not registered.
    pub async fn sync(
        &self,
        integration_id: &IntegrationId,
        direction: SyncDirection,
    ) -> Result<SyncOutcome, ConfigurationError> {
        self.orchestrator.sync(integration_id, direction).await
    }

    /// Returns recent events, newest first, optionally filtered to one
    /// integration.
    #[must_use]
    pub fn events(
        &self,
        integration_id: Option<&IntegrationId>,
        limit: usize,
    ) -> Vec<IntegrationEvent> {
        self.log.query(integration_id, limit)
    }

    /// Computes rolling request metrics for an integration.
    #[must_use]
    pub fn metrics(
        &self,
        integration_id: &IntegrationId,
        timeframe: MetricsTimeframe,
    ) -> IntegrationMetrics {
        self.log.metrics(integration_id, timeframe)
    }

    /// Waits until every event appended so far is visible to queries.
    pub async fn flush_events(&self) {
        self.log.flush().await;
    }

    /// Drains pending events and stops the log's writer task.
    ///
    /// Events already appended stay queryable; later appends are dropped.
    pub async fn shutdown(&self) {
        self.log.flush().await;
        self.log.close().await;
        tracing::info!("integration service shut down");
    }

    fn record_connection_failure(&self, integration_id: &IntegrationId, message: String) {
        tracing::warn!(
            integration_id = %integration_id,
            error = %message,
            "connection test failed"
        );
        self.log.append(
            IntegrationEvent::new(
                integration_id.clone(),
                EventType::Error,
                EventDirection::Outbound,
                EventStatus::Failed,
            )
            .with_data(json!({ "operation": "connection_test" }))
            .with_error(message),
        );
    }
}
