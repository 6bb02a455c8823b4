//! Scheduled data synchronization.
//!
//! A sync run moves data between the CRM and one external service in a
//! chosen direction. The orchestrator owns the run lifecycle: it checks
//! that the integration exists and has sync enabled, refuses to overlap
//! two runs for the same integration, drives the adapter steps, stamps
//! `last_sync` on success, and records a sync event either way. Adapter
//! failures are absorbed into the outcome so a broken provider cannot
//! take the scheduler down with it.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use switchboard_core::IntegrationId;
use switchboard_events::{
    EventDirection, EventLog, EventMetadata, EventStatus, EventType, IntegrationEvent,
};

use crate::config::IntegrationConfig;
use crate::dispatcher::{ApiCall, ApiDispatcher};
use crate::error::ConfigurationError;
use crate::registry::IntegrationRegistry;

/// Which way data moves during a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Fetch remote changes into the CRM.
    Pull,
    /// Send local changes to the external service.
    Push,
    /// Pull first, then push.
    Bidirectional,
}

impl SyncDirection {
    /// The direction as its wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a sync adapter step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    /// What went wrong, in the adapter's words.
    pub message: String,
}

impl SyncError {
    /// Creates a sync error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sync failed: {}", self.message)
    }
}

impl std::error::Error for SyncError {}

/// Provider-specific sync steps.
///
/// Adapters do the actual data movement; the orchestrator decides when
/// they run and records what happened.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Fetches remote changes for the integration.
    ///
    /// # Errors
    ///
    /// Returns an error when the remote data could not be fetched.
    async fn pull(&self, config: &IntegrationConfig) -> Result<(), SyncError>;

    /// Sends local changes to the integration.
    ///
    /// # Errors
    ///
    /// Returns an error when the local data could not be delivered.
    async fn push(&self, config: &IntegrationConfig) -> Result<(), SyncError>;
}

/// Why a sync run did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSkipReason {
    /// The integration has `sync_enabled` off.
    Disabled,
    /// Another run for the same integration is still in flight.
    AlreadyRunning,
}

/// How a sync run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every step finished and `last_sync` was updated.
    Completed,
    /// The run never started.
    Skipped(SyncSkipReason),
    /// A step failed; the failure was recorded and absorbed.
    Failed {
        /// The step failure, in the adapter's words.
        message: String,
    },
}

impl SyncOutcome {
    /// Returns `true` when the run finished all its steps.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Removes the integration from the in-flight set when the run ends,
/// however it ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<IntegrationId>>,
    id: IntegrationId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.id);
    }
}

/// Drives sync runs against registered adapters.
pub struct SyncOrchestrator {
    registry: Arc<IntegrationRegistry>,
    log: Arc<EventLog>,
    adapters: RwLock<HashMap<IntegrationId, Arc<dyn SyncAdapter>>>,
    in_flight: Mutex<HashSet<IntegrationId>>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over a registry and event log.
    #[must_use]
    pub fn new(registry: Arc<IntegrationRegistry>, log: Arc<EventLog>) -> Self {
        Self {
            registry,
            log,
            adapters: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Binds the adapter that moves data for an integration.
    ///
    /// Registering again replaces the previous adapter.
    pub fn register_adapter(
        &self,
        integration_id: impl Into<IntegrationId>,
        adapter: Arc<dyn SyncAdapter>,
    ) {
        let integration_id = integration_id.into();
        tracing::info!(integration_id = %integration_id, "sync adapter registered");
        self.adapters.write().unwrap().insert(integration_id, adapter);
    }

    /// Returns `true` when an adapter is bound for the integration.
    #[must_use]
    pub fn has_adapter(&self, integration_id: &IntegrationId) -> bool {
        self.adapters.read().unwrap().contains_key(integration_id)
    }

    /// Runs one sync for an integration.
    ///
    /// Step failures and a missing adapter end up as [`SyncOutcome::Failed`]
    /// with a failed sync event; only an unknown integration is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NotFound`] when the integration is not
    /// registered.
    pub async fn sync(
        &self,
        integration_id: &IntegrationId,
        direction: SyncDirection,
    ) -> Result<SyncOutcome, ConfigurationError> {
        let config = self
            .registry
            .get(integration_id)
            .ok_or_else(|| ConfigurationError::NotFound {
                id: integration_id.clone(),
            })?;

        if !config.settings.sync_enabled {
            tracing::debug!(integration_id = %integration_id, "sync disabled, skipping");
            return Ok(SyncOutcome::Skipped(SyncSkipReason::Disabled));
        }

        let _guard = {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(integration_id.clone()) {
                tracing::debug!(
                    integration_id = %integration_id,
                    "sync already in flight, skipping"
                );
                return Ok(SyncOutcome::Skipped(SyncSkipReason::AlreadyRunning));
            }
            InFlightGuard {
                in_flight: &self.in_flight,
                id: integration_id.clone(),
            }
        };

        let adapter = {
            let adapters = self.adapters.read().unwrap();
            adapters.get(integration_id).map(Arc::clone)
        };
        let Some(adapter) = adapter else {
            let message = "no sync adapter registered".to_owned();
            self.record_run(integration_id, direction, 0, Some(&message));
            return Ok(SyncOutcome::Failed { message });
        };

        let started = Instant::now();
        let result = match direction {
            SyncDirection::Pull => adapter.pull(&config).await,
            SyncDirection::Push => adapter.push(&config).await,
            SyncDirection::Bidirectional => match adapter.pull(&config).await {
                Ok(()) => adapter.push(&config).await,
                Err(error) => Err(error),
            },
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => {
                self.registry.touch_last_sync(integration_id, Utc::now())?;
                self.record_run(integration_id, direction, elapsed_ms, None);
                tracing::info!(
                    integration_id = %integration_id,
                    direction = %direction,
                    elapsed_ms,
                    "sync completed"
                );
                Ok(SyncOutcome::Completed)
            }
            Err(error) => {
                self.record_run(integration_id, direction, elapsed_ms, Some(&error.message));
                tracing::warn!(
                    integration_id = %integration_id,
                    direction = %direction,
                    error = %error.message,
                    "sync failed"
                );
                Ok(SyncOutcome::Failed {
                    message: error.message,
                })
            }
        }
    }

    fn record_run(
        &self,
        integration_id: &IntegrationId,
        direction: SyncDirection,
        elapsed_ms: u64,
        error: Option<&str>,
    ) {
        let status = if error.is_none() {
            EventStatus::Success
        } else {
            EventStatus::Failed
        };
        let mut event = IntegrationEvent::new(
            integration_id.clone(),
            EventType::Sync,
            EventDirection::Outbound,
            status,
        )
        .with_data(json!({ "direction": direction.as_str() }))
        .with_metadata(EventMetadata::default().with_response_time_ms(elapsed_ms));
        if let Some(message) = error {
            event = event.with_error(message);
        }
        self.log.append(event);
    }
}

/// Adapter that records what it was asked to do.
///
/// Useful for exercising sync flows without a provider; each step can be
/// made to fail with a fixed message.
pub struct MockSyncAdapter {
    pull_failure: Option<String>,
    push_failure: Option<String>,
    steps: Mutex<Vec<String>>,
}

impl MockSyncAdapter {
    /// An adapter whose steps all succeed.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            pull_failure: None,
            push_failure: None,
            steps: Mutex::new(Vec::new()),
        }
    }

    /// An adapter whose pull step fails with the given message.
    #[must_use]
    pub fn failing_pull(message: impl Into<String>) -> Self {
        Self {
            pull_failure: Some(message.into()),
            ..Self::succeeding()
        }
    }

    /// An adapter whose push step fails with the given message.
    #[must_use]
    pub fn failing_push(message: impl Into<String>) -> Self {
        Self {
            push_failure: Some(message.into()),
            ..Self::succeeding()
        }
    }

    /// The steps run so far, in order, as `"pull"` / `"push"`.
    #[must_use]
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().unwrap().clone()
    }

    /// Number of pull steps run so far.
    #[must_use]
    pub fn pull_count(&self) -> usize {
        self.steps().iter().filter(|step| *step == "pull").count()
    }

    /// Number of push steps run so far.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.steps().iter().filter(|step| *step == "push").count()
    }

    fn run_step(&self, step: &str, failure: &Option<String>) -> Result<(), SyncError> {
        self.steps.lock().unwrap().push(step.to_owned());
        match failure {
            Some(message) => Err(SyncError::new(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncAdapter for MockSyncAdapter {
    async fn pull(&self, _config: &IntegrationConfig) -> Result<(), SyncError> {
        self.run_step("pull", &self.pull_failure)
    }

    async fn push(&self, _config: &IntegrationConfig) -> Result<(), SyncError> {
        self.run_step("push", &self.push_failure)
    }
}

/// Adapter that syncs through an integration's named endpoints.
///
/// `pull` issues a GET to the integration's `"pull"` endpoint and `push`
/// a POST to `"push"`. Both go through the dispatcher, so rate limits
/// apply and API call events are recorded alongside the sync event. An
/// integration without the needed named endpoint fails the step.
pub struct EndpointSyncAdapter {
    dispatcher: Arc<ApiDispatcher>,
}

impl EndpointSyncAdapter {
    /// Creates an adapter that calls through the given dispatcher.
    #[must_use]
    pub fn new(dispatcher: Arc<ApiDispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn run(
        &self,
        config: &IntegrationConfig,
        step: &str,
        call: ApiCall,
    ) -> Result<(), SyncError> {
        match self.dispatcher.call(&config.id, call).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(SyncError::new(format!(
                "{step} endpoint returned HTTP {}",
                response.status
            ))),
            Err(error) => Err(SyncError::new(error.to_string())),
        }
    }
}

#[async_trait]
impl SyncAdapter for EndpointSyncAdapter {
    async fn pull(&self, config: &IntegrationConfig) -> Result<(), SyncError> {
        let Some(endpoint) = config.endpoints.url("pull") else {
            return Err(SyncError::new("no 'pull' endpoint configured"));
        };
        self.run(config, "pull", ApiCall::get(endpoint)).await
    }

    async fn push(&self, config: &IntegrationConfig) -> Result<(), SyncError> {
        let Some(endpoint) = config.endpoints.url("push") else {
            return Err(SyncError::new("no 'push' endpoint configured"));
        };
        self.run(config, "push", ApiCall::post(endpoint)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoints, IntegrationCategory, IntegrationSettings};
    use crate::transport::MockTransport;
    use tokio::sync::Notify;

    fn sync_enabled_config(id: &str) -> IntegrationConfig {
        IntegrationConfig::new(id, IntegrationCategory::Crm, "hubspot")
            .with_settings(IntegrationSettings::default().with_sync_enabled(true))
            .with_endpoints(Endpoints::new("https://api.example.com"))
    }

    fn fixture() -> (Arc<IntegrationRegistry>, Arc<EventLog>, SyncOrchestrator) {
        let registry = Arc::new(IntegrationRegistry::new());
        let log = Arc::new(EventLog::new());
        let orchestrator = SyncOrchestrator::new(Arc::clone(&registry), Arc::clone(&log));
        (registry, log, orchestrator)
    }

    #[tokio::test]
    async fn completed_pull_touches_last_sync_and_logs() {
        let (registry, log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let adapter = Arc::new(MockSyncAdapter::succeeding());
        orchestrator.register_adapter("hubspot", Arc::clone(&adapter) as Arc<dyn SyncAdapter>);
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator.sync(&id, SyncDirection::Pull).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(adapter.steps(), vec!["pull"]);
        let config = registry.get(&id).unwrap();
        assert!(config.settings.last_sync.is_some());

        log.flush().await;
        let events = log.query(Some(&id), 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Sync);
        assert_eq!(events[0].direction, EventDirection::Outbound);
        assert_eq!(events[0].status, EventStatus::Success);
        assert_eq!(events[0].data["direction"], "pull");
    }

    #[tokio::test]
    async fn disabled_integration_is_skipped_quietly() {
        let (registry, log, orchestrator) = fixture();
        let config = IntegrationConfig::new("hubspot", IntegrationCategory::Crm, "hubspot")
            .with_endpoints(Endpoints::new("https://api.example.com"));
        registry.register(config).unwrap();
        let adapter = Arc::new(MockSyncAdapter::succeeding());
        orchestrator.register_adapter("hubspot", Arc::clone(&adapter) as Arc<dyn SyncAdapter>);
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator.sync(&id, SyncDirection::Pull).await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped(SyncSkipReason::Disabled));
        assert!(adapter.steps().is_empty());
        log.flush().await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn unknown_integration_is_an_error() {
        let (_registry, _log, orchestrator) = fixture();
        let id = IntegrationId::from("ghost");

        let error = orchestrator
            .sync(&id, SyncDirection::Pull)
            .await
            .unwrap_err();

        assert!(matches!(error, ConfigurationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn missing_adapter_is_recorded_as_failure() {
        let (registry, log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator.sync(&id, SyncDirection::Pull).await.unwrap();

        match outcome {
            SyncOutcome::Failed { message } => assert!(message.contains("no sync adapter")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(registry.get(&id).unwrap().settings.last_sync.is_none());
        log.flush().await;
        let events = log.query(Some(&id), 10);
        assert_eq!(events.len(), 1);
        assert!(events[0].is_failure());
    }

    #[tokio::test]
    async fn pull_failure_skips_push_and_keeps_last_sync_clear() {
        let (registry, log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let adapter = Arc::new(MockSyncAdapter::failing_pull("remote unavailable"));
        orchestrator.register_adapter("hubspot", Arc::clone(&adapter) as Arc<dyn SyncAdapter>);
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator
            .sync(&id, SyncDirection::Bidirectional)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SyncOutcome::Failed {
                message: "remote unavailable".to_owned()
            }
        );
        assert_eq!(adapter.steps(), vec!["pull"]);
        assert!(registry.get(&id).unwrap().settings.last_sync.is_none());

        log.flush().await;
        let events = log.query(Some(&id), 10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
        assert_eq!(events[0].error.as_deref(), Some("remote unavailable"));
    }

    #[tokio::test]
    async fn bidirectional_runs_pull_then_push() {
        let (registry, _log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let adapter = Arc::new(MockSyncAdapter::succeeding());
        orchestrator.register_adapter("hubspot", Arc::clone(&adapter) as Arc<dyn SyncAdapter>);
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator
            .sync(&id, SyncDirection::Bidirectional)
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(adapter.steps(), vec!["pull", "push"]);
    }

    #[tokio::test]
    async fn push_direction_only_pushes() {
        let (registry, _log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let adapter = Arc::new(MockSyncAdapter::succeeding());
        orchestrator.register_adapter("hubspot", Arc::clone(&adapter) as Arc<dyn SyncAdapter>);
        let id = IntegrationId::from("hubspot");

        orchestrator.sync(&id, SyncDirection::Push).await.unwrap();

        assert_eq!(adapter.steps(), vec!["push"]);
    }

    struct GatedAdapter {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SyncAdapter for GatedAdapter {
        async fn pull(&self, _config: &IntegrationConfig) -> Result<(), SyncError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn push(&self, _config: &IntegrationConfig) -> Result<(), SyncError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn overlapping_run_for_same_integration_is_skipped() {
        let (registry, _log, orchestrator) = fixture();
        registry.register(sync_enabled_config("hubspot")).unwrap();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        orchestrator.register_adapter(
            "hubspot",
            Arc::new(GatedAdapter {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
        );
        let orchestrator = Arc::new(orchestrator);
        let id = IntegrationId::from("hubspot");

        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            let id = id.clone();
            tokio::spawn(async move { orchestrator.sync(&id, SyncDirection::Pull).await })
        };
        entered.notified().await;

        let second = orchestrator.sync(&id, SyncDirection::Pull).await.unwrap();
        assert_eq!(second, SyncOutcome::Skipped(SyncSkipReason::AlreadyRunning));

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.is_completed());

        // The in-flight slot is free again once the run ends.
        release.notify_one();
        let third = {
            let orchestrator = Arc::clone(&orchestrator);
            let id = id.clone();
            tokio::spawn(async move { orchestrator.sync(&id, SyncDirection::Pull).await })
        };
        entered.notified().await;
        let third = third.await.unwrap().unwrap();
        assert!(third.is_completed());
    }

    #[tokio::test]
    async fn endpoint_adapter_pulls_through_the_dispatcher() {
        let transport = Arc::new(MockTransport::succeeding());
        let registry = Arc::new(IntegrationRegistry::new());
        let log = Arc::new(EventLog::new());
        let dispatcher = Arc::new(ApiDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&log),
            Arc::clone(&transport) as Arc<dyn crate::transport::Transport>,
        ));
        let orchestrator = SyncOrchestrator::new(Arc::clone(&registry), Arc::clone(&log));

        let config = IntegrationConfig::new("hubspot", IntegrationCategory::Crm, "hubspot")
            .with_settings(IntegrationSettings::default().with_sync_enabled(true))
            .with_endpoints(
                Endpoints::new("https://api.example.com").with_named("pull", "/contacts/export"),
            );
        registry.register(config).unwrap();
        orchestrator.register_adapter("hubspot", Arc::new(EndpointSyncAdapter::new(dispatcher)));
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator.sync(&id, SyncDirection::Pull).await.unwrap();

        assert!(outcome.is_completed());
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://api.example.com/contacts/export");

        log.flush().await;
        let events = log.query(Some(&id), 10);
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert!(kinds.contains(&EventType::ApiCall));
        assert!(kinds.contains(&EventType::Sync));
    }

    #[tokio::test]
    async fn endpoint_adapter_without_named_endpoint_fails_the_step() {
        let transport = Arc::new(MockTransport::succeeding());
        let registry = Arc::new(IntegrationRegistry::new());
        let log = Arc::new(EventLog::new());
        let dispatcher = Arc::new(ApiDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&log),
            Arc::clone(&transport) as Arc<dyn crate::transport::Transport>,
        ));
        let orchestrator = SyncOrchestrator::new(Arc::clone(&registry), Arc::clone(&log));
        registry.register(sync_enabled_config("hubspot")).unwrap();
        orchestrator.register_adapter("hubspot", Arc::new(EndpointSyncAdapter::new(dispatcher)));
        let id = IntegrationId::from("hubspot");

        let outcome = orchestrator.sync(&id, SyncDirection::Push).await.unwrap();

        match outcome {
            SyncOutcome::Failed { message } => {
                assert!(message.contains("no 'push' endpoint"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(transport.request_count(), 0);
    }
}
