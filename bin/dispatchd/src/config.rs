//! Centralized daemon configuration.
//!
//! This module provides strongly-typed configuration for the daemon,
//! loaded via the `config` crate from an optional TOML file and from
//! environment variables. Integrations are declared in the file; the
//! `SWITCHBOARD`-prefixed environment overrides the scalar settings,
//! e.g. `SWITCHBOARD__DAEMON__EVENT_LOG_CAPACITY=500`.

use serde::Deserialize;
use std::time::Duration;
use switchboard_events::DEFAULT_CAPACITY;
use switchboard_integration::{
    Credentials, Endpoints, HttpTransportConfig, IntegrationCategory, IntegrationConfig,
    IntegrationSettings, ServiceConfig, SyncDirection,
};

use crate::error::DaemonError;

/// Environment variable naming the configuration file.
const CONFIG_PATH_VAR: &str = "SWITCHBOARD_CONFIG";

/// Configuration file consulted when [`CONFIG_PATH_VAR`] is unset.
const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";

/// Daemon configuration composed from file and environment sources.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// Daemon-wide tunables.
    #[serde(default)]
    pub daemon: DaemonSettings,

    /// Integrations registered at startup.
    #[serde(default)]
    pub integrations: Vec<IntegrationEntry>,
}

/// Daemon-wide tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonSettings {
    /// How many events the log retains before evicting the oldest.
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// Deadline for a single webhook handler invocation, in seconds.
    #[serde(default = "default_webhook_handler_timeout_seconds")]
    pub webhook_handler_timeout_seconds: u64,

    /// Outbound HTTP request deadline, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_event_log_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_webhook_handler_timeout_seconds() -> u64 {
    30
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            event_log_capacity: default_event_log_capacity(),
            webhook_handler_timeout_seconds: default_webhook_handler_timeout_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl DaemonSettings {
    /// The service tunables these settings describe.
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            event_log_capacity: self.event_log_capacity,
            webhook_handler_timeout: Duration::from_secs(self.webhook_handler_timeout_seconds),
        }
    }

    /// The transport tunables these settings describe.
    #[must_use]
    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            ..HttpTransportConfig::default()
        }
    }
}

/// One integration declared in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationEntry {
    /// Unique identifier for the integration.
    pub id: String,

    /// Service category.
    pub category: IntegrationCategory,

    /// Provider label, e.g. `"hubspot"`.
    pub provider: String,

    /// Credential material for outbound calls.
    #[serde(default)]
    pub credentials: Credentials,

    /// Behavioral settings, including sync cadence and rate limits.
    #[serde(default)]
    pub settings: IntegrationSettings,

    /// Base and named endpoints.
    pub endpoints: Endpoints,

    /// Direction used by the daemon's periodic sync runs.
    #[serde(default = "default_sync_direction")]
    pub sync_direction: SyncDirection,
}

fn default_sync_direction() -> SyncDirection {
    SyncDirection::Bidirectional
}

impl IntegrationEntry {
    /// Converts the entry into a registrable integration definition.
    #[must_use]
    pub fn into_config(self) -> IntegrationConfig {
        IntegrationConfig::new(self.id, self.category, self.provider)
            .with_credentials(self.credentials)
            .with_settings(self.settings)
            .with_endpoints(self.endpoints)
    }
}

impl DaemonConfig {
    /// Loads configuration from the default file location and environment.
    ///
    /// The file named by `SWITCHBOARD_CONFIG` (or `switchboard.toml` in the
    /// working directory) is optional; a missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a present source cannot be read or does not
    /// match the expected shape.
    pub fn load() -> switchboard_core::Result<Self, DaemonError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from an explicit file path and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a present source cannot be read or does not
    /// match the expected shape.
    pub fn load_from(path: &str) -> switchboard_core::Result<Self, DaemonError> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix("SWITCHBOARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| DaemonError::Load {
                details: e.to_string(),
            })?;

        let config = settings.try_deserialize().map_err(|e| DaemonError::Parse {
            details: e.to_string(),
        })?;
        Ok(config)
    }
}
