//! Outbound API call dispatch.
//!
//! The dispatcher is the single gate for outbound traffic: it resolves the
//! integration, consults its rate limiter, attaches credential headers,
//! measures latency, and records one event per attempted call. HTTP error
//! statuses are returned to the caller; only transport failures are raised.

use crate::error::{ConfigurationError, DispatchError};
use crate::registry::IntegrationRegistry;
use crate::transport::{HttpMethod, Transport, TransportRequest, TransportResponse};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchboard_core::IntegrationId;
use switchboard_events::{
    EventDirection, EventLog, EventMetadata, EventStatus, EventType, IntegrationEvent,
};

/// An outbound call to make through an integration.
///
/// `endpoint` is resolved against the integration's base URL unless it is
/// already absolute.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
    /// HTTP method.
    pub method: HttpMethod,
    /// Endpoint path or absolute URL.
    pub endpoint: String,
    /// Caller headers; these win over credential headers.
    pub headers: HashMap<String, String>,
    /// JSON body, if any.
    pub body: Option<JsonValue>,
    /// Per-call deadline.
    pub timeout: Option<Duration>,
}

impl ApiCall {
    /// Creates a call.
    #[must_use]
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Creates a GET call.
    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    /// Creates a POST call.
    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, endpoint)
    }

    /// Sets a header, overwriting any previous value for the name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Dispatches authenticated outbound calls for registered integrations.
pub struct ApiDispatcher {
    registry: Arc<IntegrationRegistry>,
    log: Arc<EventLog>,
    transport: Arc<dyn Transport>,
}

impl ApiDispatcher {
    /// Creates a dispatcher over a registry, event log, and transport.
    #[must_use]
    pub fn new(
        registry: Arc<IntegrationRegistry>,
        log: Arc<EventLog>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            log,
            transport,
        }
    }

    /// Makes an outbound call through an integration.
    ///
    /// The call is admitted through the integration's rate limiter when one
    /// is bound; a rejected call makes no transport attempt and records no
    /// event. Credential headers are attached in fixed order (API key, then
    /// access token, then caller headers), so the caller's value wins for
    /// any shared name.
    ///
    /// Returns the response for every completed exchange, including HTTP
    /// error statuses; those are recorded as failed events but are the
    /// caller's to interpret.
    ///
    /// # Errors
    ///
    /// Returns an error when the integration is unknown, its rate limit
    /// rejected the call, or the transport failed.
    pub async fn call(
        &self,
        integration_id: &IntegrationId,
        call: ApiCall,
    ) -> Result<TransportResponse, DispatchError> {
        let config = self
            .registry
            .get(integration_id)
            .ok_or_else(|| ConfigurationError::NotFound {
                id: integration_id.clone(),
            })?;

        if let Some(limiter) = self.registry.limiter(integration_id) {
            if !limiter.try_acquire(Utc::now()) {
                tracing::warn!(
                    integration_id = %integration_id,
                    endpoint = %call.endpoint,
                    "rate limit rejected outbound call"
                );
                return Err(DispatchError::RateLimited {
                    integration_id: integration_id.clone(),
                });
            }
        }

        let url = resolve_endpoint(&config.endpoints.base, &call.endpoint);
        let mut request = TransportRequest::new(call.method, url.clone());
        if let Some(api_key) = &config.credentials.api_key {
            request = request.with_header("Authorization", format!("Bearer {api_key}"));
        }
        if let Some(token) = &config.credentials.access_token {
            request = request.with_header("Authorization", format!("Bearer {token}"));
        }
        for (name, value) in call.headers {
            request = request.with_header(name, value);
        }
        if let Some(body) = call.body {
            request = request.with_body(body);
        }
        if let Some(timeout) = call.timeout {
            request = request.with_timeout(timeout);
        }

        let started = Instant::now();
        let outcome = self.transport.send(request).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let data = serde_json::json!({
            "method": call.method.as_str(),
            "endpoint": call.endpoint,
        });
        let metadata = EventMetadata::default()
            .with_endpoint(url)
            .with_response_time_ms(elapsed_ms);

        match outcome {
            Ok(response) => {
                let status = if response.is_success() {
                    EventStatus::Success
                } else {
                    EventStatus::Failed
                };
                let mut event = IntegrationEvent::new(
                    integration_id.clone(),
                    EventType::ApiCall,
                    EventDirection::Outbound,
                    status,
                )
                .with_data(data)
                .with_metadata(metadata.with_http_status(response.status));
                if !response.is_success() {
                    event = event.with_error(format!("HTTP {}", response.status));
                }
                self.log.append(event);

                tracing::debug!(
                    integration_id = %integration_id,
                    endpoint = %call.endpoint,
                    http_status = response.status,
                    elapsed_ms,
                    "outbound call completed"
                );
                Ok(response)
            }
            Err(error) => {
                self.log.append(
                    IntegrationEvent::new(
                        integration_id.clone(),
                        EventType::ApiCall,
                        EventDirection::Outbound,
                        EventStatus::Failed,
                    )
                    .with_data(data)
                    .with_error(error.to_string())
                    .with_metadata(metadata),
                );

                tracing::warn!(
                    integration_id = %integration_id,
                    endpoint = %call.endpoint,
                    error = %error,
                    "outbound call failed"
                );
                Err(DispatchError::Transport(error))
            }
        }
    }
}

/// Resolves a call endpoint against an integration's base URL.
///
/// Absolute endpoints pass through untouched.
fn resolve_endpoint(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_owned();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Credentials, Endpoints, IntegrationCategory, IntegrationConfig, IntegrationSettings,
    };
    use crate::error::TransportError;
    use crate::rate_limit::RateLimits;
    use crate::transport::MockTransport;

    fn fixture(
        transport: Arc<MockTransport>,
    ) -> (Arc<IntegrationRegistry>, Arc<EventLog>, ApiDispatcher) {
        let registry = Arc::new(IntegrationRegistry::new());
        let log = Arc::new(EventLog::new());
        let dispatcher = ApiDispatcher::new(Arc::clone(&registry), Arc::clone(&log), transport);
        (registry, log, dispatcher)
    }

    fn definition(id: &str) -> IntegrationConfig {
        IntegrationConfig::new(id, IntegrationCategory::Crm, "Test Provider")
            .with_endpoints(Endpoints::new("https://api.example.com"))
    }

    #[tokio::test]
    async fn relative_endpoint_joins_base() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .expect("call");

        assert_eq!(
            transport.requests()[0].url,
            "https://api.example.com/v1/contacts"
        );
    }

    #[tokio::test]
    async fn absolute_endpoint_bypasses_base() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        dispatcher
            .call(
                &IntegrationId::from("hubspot"),
                ApiCall::get("https://files.example.net/export.csv"),
            )
            .await
            .expect("call");

        assert_eq!(
            transport.requests()[0].url,
            "https://files.example.net/export.csv"
        );
    }

    #[tokio::test]
    async fn access_token_wins_over_api_key() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry
            .register(definition("hubspot").with_credentials(
                Credentials::default()
                    .with_api_key("the-key")
                    .with_access_token("the-token"),
            ))
            .expect("register");

        dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .expect("call");

        assert_eq!(
            transport.requests()[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer the-token")
        );
    }

    #[tokio::test]
    async fn api_key_used_when_no_token() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry
            .register(
                definition("hubspot")
                    .with_credentials(Credentials::default().with_api_key("the-key")),
            )
            .expect("register");

        dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .expect("call");

        assert_eq!(
            transport.requests()[0].headers.get("Authorization").map(String::as_str),
            Some("Bearer the-key")
        );
    }

    #[tokio::test]
    async fn caller_header_wins_over_credentials() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry
            .register(
                definition("hubspot")
                    .with_credentials(Credentials::default().with_access_token("the-token")),
            )
            .expect("register");

        dispatcher
            .call(
                &IntegrationId::from("hubspot"),
                ApiCall::get("/v1/contacts").with_header("Authorization", "Basic abc123"),
            )
            .await
            .expect("call");

        assert_eq!(
            transport.requests()[0].headers.get("Authorization").map(String::as_str),
            Some("Basic abc123")
        );
    }

    #[tokio::test]
    async fn unknown_integration_is_configuration_error() {
        let transport = Arc::new(MockTransport::succeeding());
        let (_registry, log, dispatcher) = fixture(Arc::clone(&transport));

        let err = dispatcher
            .call(&IntegrationId::from("missing"), ApiCall::get("/v1/contacts"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Configuration(ConfigurationError::NotFound { .. })
        ));
        assert_eq!(transport.request_count(), 0);
        log.flush().await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_call_makes_no_attempt_and_no_event() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, log, dispatcher) = fixture(Arc::clone(&transport));
        registry
            .register(definition("hubspot").with_settings(
                IntegrationSettings::default().with_rate_limits(RateLimits::new(1, 10, 100)),
            ))
            .expect("register");
        let id = IntegrationId::from("hubspot");

        dispatcher
            .call(&id, ApiCall::get("/v1/contacts"))
            .await
            .expect("first call");
        let err = dispatcher
            .call(&id, ApiCall::get("/v1/contacts"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::RateLimited { .. }));
        assert_eq!(transport.request_count(), 1);
        log.flush().await;
        assert_eq!(log.query(None, 10).len(), 1);
    }

    #[tokio::test]
    async fn success_records_success_event() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .expect("call");
        log.flush().await;

        let events = log.query(None, 10);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::ApiCall);
        assert_eq!(event.direction, EventDirection::Outbound);
        assert_eq!(event.status, EventStatus::Success);
        assert_eq!(event.metadata.http_status, Some(200));
        assert!(event.metadata.response_time_ms.is_some());
        assert_eq!(
            event.metadata.endpoint.as_deref(),
            Some("https://api.example.com/v1/contacts")
        );
        assert_eq!(event.data["method"], "GET");
    }

    #[tokio::test]
    async fn http_error_returns_response_and_logs_failure() {
        let transport = Arc::new(MockTransport::with_status(500));
        let (registry, log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        let response = dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .expect("http errors are returned, not raised");
        assert_eq!(response.status, 500);

        log.flush().await;
        let events = log.query(None, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
        assert_eq!(events[0].error.as_deref(), Some("HTTP 500"));
        assert_eq!(events[0].metadata.http_status, Some(500));
    }

    #[tokio::test]
    async fn transport_failure_is_raised_and_logged() {
        let transport = Arc::new(MockTransport::failing(TransportError::Timeout));
        let (registry, log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        let err = dispatcher
            .call(&IntegrationId::from("hubspot"), ApiCall::get("/v1/contacts"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Timeout)));

        log.flush().await;
        let events = log.query(None, 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
        assert!(events[0].error.as_deref().unwrap().contains("timed out"));
        assert!(events[0].metadata.http_status.is_none());
        assert!(events[0].metadata.response_time_ms.is_some());
    }

    #[tokio::test]
    async fn body_and_timeout_reach_the_transport() {
        let transport = Arc::new(MockTransport::succeeding());
        let (registry, _log, dispatcher) = fixture(Arc::clone(&transport));
        registry.register(definition("hubspot")).expect("register");

        dispatcher
            .call(
                &IntegrationId::from("hubspot"),
                ApiCall::post("/v1/contacts")
                    .with_body(serde_json::json!({"name": "Ada"}))
                    .with_timeout(Duration::from_secs(5)),
            )
            .await
            .expect("call");

        let request = &transport.requests()[0];
        assert_eq!(request.body, Some(serde_json::json!({"name": "Ada"})));
        assert_eq!(request.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn endpoint_resolution_normalizes_slashes() {
        assert_eq!(
            resolve_endpoint("https://api.example.com/", "/v1/users"),
            "https://api.example.com/v1/users"
        );
        assert_eq!(
            resolve_endpoint("https://api.example.com", "v1/users"),
            "https://api.example.com/v1/users"
        );
    }
}
