//! Integration dispatcher daemon.
//!
//! Loads integration definitions from configuration, registers and
//! connection-tests each one, then drives periodic syncs until shutdown.

mod config;
mod error;

use std::sync::Arc;
use std::time::Duration;
use switchboard_core::IntegrationId;
use switchboard_integration::{
    EndpointSyncAdapter, IntegrationService, IntegrationStatus, ReqwestTransport, SyncAdapter,
    SyncDirection, Transport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from file and environment
    let config = DaemonConfig::load().expect("failed to load configuration");
    tracing::info!(
        integrations = config.integrations.len(),
        "loaded configuration"
    );

    let transport = ReqwestTransport::with_config(config.daemon.transport_config())
        .expect("failed to build http transport");
    let service = Arc::new(IntegrationService::with_config(
        Arc::new(transport) as Arc<dyn Transport>,
        config.daemon.service_config(),
    ));

    // One shared adapter; it reads each integration's own endpoints.
    let endpoint_adapter = Arc::new(EndpointSyncAdapter::new(service.dispatcher()));

    for entry in config.integrations {
        let sync_direction = entry.sync_direction;
        let integration = entry.into_config();
        let id = integration.id.clone();
        let sync_enabled = integration.settings.sync_enabled;
        let sync_interval_minutes = integration.settings.sync_interval_minutes;

        match service.register(integration).await {
            Ok(registered) => {
                tracing::info!(
                    integration_id = %id,
                    status = ?registered.status,
                    "integration registered"
                );
                if sync_enabled {
                    service.register_sync_adapter(
                        id.clone(),
                        Arc::clone(&endpoint_adapter) as Arc<dyn SyncAdapter>,
                    );
                    spawn_sync_driver(
                        Arc::clone(&service),
                        id,
                        sync_direction,
                        sync_interval_minutes,
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    integration_id = %id,
                    error = %e,
                    "failed to register integration, skipping"
                );
            }
        }
    }

    tracing::info!("dispatcher running");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");
    tracing::info!("shutting down");
    service.shutdown().await;
}

/// Spawns the periodic sync loop for one integration.
///
/// Ticks are skipped while the integration is not active; a re-test that
/// brings it back to active resumes syncing on the next tick.
fn spawn_sync_driver(
    service: Arc<IntegrationService>,
    integration_id: IntegrationId,
    direction: SyncDirection,
    interval_minutes: u32,
) {
    tokio::spawn(async move {
        let period = Duration::from_secs(u64::from(interval_minutes.max(1)) * 60);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;

            let status = service.get(&integration_id).map(|c| c.status);
            if status != Some(IntegrationStatus::Active) {
                tracing::debug!(
                    integration_id = %integration_id,
                    ?status,
                    "integration not active, skipping sync tick"
                );
                continue;
            }

            match service.sync(&integration_id, direction).await {
                Ok(outcome) => {
                    tracing::debug!(
                        integration_id = %integration_id,
                        ?outcome,
                        "sync tick finished"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        integration_id = %integration_id,
                        error = %e,
                        "sync tick failed"
                    );
                }
            }
        }
    });
}
