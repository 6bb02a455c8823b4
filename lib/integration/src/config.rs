//! Integration definitions.
//!
//! An `IntegrationConfig` describes one connection to an external service:
//! its credentials, sync settings, declared rate limits, and endpoints.
//! Well-known fields are typed; anything provider-specific goes into the
//! explicit `extra` extension maps.

use crate::rate_limit::RateLimits;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use switchboard_core::IntegrationId;

/// The kind of external service an integration connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationCategory {
    /// Email delivery and inbox access.
    Email,
    /// SMS and text messaging.
    Sms,
    /// Calendar and scheduling.
    Calendar,
    /// File and object storage.
    Storage,
    /// Other CRM systems.
    Crm,
    /// Payment processing.
    Payment,
    /// Analytics and tracking.
    Analytics,
    /// Team communication.
    Communication,
}

/// Lifecycle status of an integration.
///
/// Only the connection-test flow changes this; partial updates cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    /// The last connection test succeeded.
    Active,
    /// Deliberately disabled.
    Inactive,
    /// The last connection test failed.
    Error,
    /// Registered but not yet tested.
    #[default]
    Pending,
}

/// Credential material for an integration.
///
/// The dispatcher never logs credential values; the `Debug` impl redacts
/// whichever fields are set.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API key, sent as a bearer token when no access token is set.
    pub api_key: Option<String>,
    /// API secret paired with the key.
    pub api_secret: Option<String>,
    /// OAuth access token; takes precedence over the API key.
    pub access_token: Option<String>,
    /// OAuth refresh token.
    pub refresh_token: Option<String>,
    /// OAuth client ID.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
    /// Shared secret for webhook payloads.
    pub webhook_secret: Option<String>,
    /// Provider-specific credential material.
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

impl Credentials {
    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the access token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    /// Adds a provider-specific entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Merges newer credential material into this set.
    ///
    /// Fields present in `newer` replace the stored value; absent fields are
    /// left alone. Extra entries are inserted key by key.
    pub fn merge(&mut self, newer: Credentials) {
        if newer.api_key.is_some() {
            self.api_key = newer.api_key;
        }
        if newer.api_secret.is_some() {
            self.api_secret = newer.api_secret;
        }
        if newer.access_token.is_some() {
            self.access_token = newer.access_token;
        }
        if newer.refresh_token.is_some() {
            self.refresh_token = newer.refresh_token;
        }
        if newer.client_id.is_some() {
            self.client_id = newer.client_id;
        }
        if newer.client_secret.is_some() {
            self.client_secret = newer.client_secret;
        }
        if newer.webhook_secret.is_some() {
            self.webhook_secret = newer.webhook_secret;
        }
        self.extra.extend(newer.extra);
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "<set>" } else { "<unset>" }
        }

        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("client_id", &redact(&self.client_id))
            .field("client_secret", &redact(&self.client_secret))
            .field("webhook_secret", &redact(&self.webhook_secret))
            .field("extra_keys", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn default_sync_interval_minutes() -> u32 {
    60
}

/// Sync behavior and declared service limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSettings {
    /// Whether periodic sync may run for this integration.
    #[serde(default)]
    pub sync_enabled: bool,
    /// Advisory cadence for the host's sync driver.
    #[serde(default = "default_sync_interval_minutes")]
    pub sync_interval_minutes: u32,
    /// When the last successful sync completed.
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    /// Declared service rate limits; absent means unthrottled.
    #[serde(default)]
    pub rate_limits: Option<RateLimits>,
    /// Provider-specific settings.
    #[serde(flatten)]
    pub extra: HashMap<String, JsonValue>,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            sync_enabled: false,
            sync_interval_minutes: default_sync_interval_minutes(),
            last_sync: None,
            rate_limits: None,
            extra: HashMap::new(),
        }
    }
}

impl IntegrationSettings {
    /// Enables periodic sync.
    #[must_use]
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// Sets the advisory sync cadence.
    #[must_use]
    pub fn with_sync_interval_minutes(mut self, minutes: u32) -> Self {
        self.sync_interval_minutes = minutes;
        self
    }

    /// Declares the service's rate limits.
    #[must_use]
    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = Some(limits);
        self
    }
}

/// Service endpoints for an integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Base URL that relative call endpoints resolve against.
    pub base: String,
    /// Named endpoints for specific operations.
    #[serde(flatten)]
    pub named: HashMap<String, String>,
}

impl Endpoints {
    /// Creates endpoints with a base URL.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            named: HashMap::new(),
        }
    }

    /// Adds a named endpoint.
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.named.insert(name.into(), url.into());
        self
    }

    /// Looks up a named endpoint.
    #[must_use]
    pub fn url(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// A registered connection to an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    /// Unique identifier, assigned by the caller.
    pub id: IntegrationId,
    /// The kind of service.
    pub category: IntegrationCategory,
    /// Human-readable provider label, e.g. "Google Calendar".
    pub provider: String,
    /// Lifecycle status.
    pub status: IntegrationStatus,
    /// Credential material.
    pub credentials: Credentials,
    /// Sync behavior and limits.
    pub settings: IntegrationSettings,
    /// Service endpoints.
    pub endpoints: Endpoints,
    /// When the integration was registered.
    pub created_at: DateTime<Utc>,
    /// When the integration was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl IntegrationConfig {
    /// Creates a definition with default settings and empty credentials.
    #[must_use]
    pub fn new(
        id: impl Into<IntegrationId>,
        category: IntegrationCategory,
        provider: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            category,
            provider: provider.into(),
            status: IntegrationStatus::default(),
            credentials: Credentials::default(),
            settings: IntegrationSettings::default(),
            endpoints: Endpoints::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the sync settings.
    #[must_use]
    pub fn with_settings(mut self, settings: IntegrationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Applies a partial update, replacing present fields wholesale.
    pub(crate) fn apply(&mut self, update: UpdateIntegration) {
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(provider) = update.provider {
            self.provider = provider;
        }
        if let Some(credentials) = update.credentials {
            self.credentials = credentials;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        if let Some(endpoints) = update.endpoints {
            self.endpoints = endpoints;
        }
        self.updated_at = Utc::now();
    }
}

/// A partial update to an integration definition.
///
/// `status` is deliberately not here: connection testing owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateIntegration {
    /// Replacement category.
    pub category: Option<IntegrationCategory>,
    /// Replacement provider label.
    pub provider: Option<String>,
    /// Replacement credentials.
    pub credentials: Option<Credentials>,
    /// Replacement settings.
    pub settings: Option<IntegrationSettings>,
    /// Replacement endpoints.
    pub endpoints: Option<Endpoints>,
}

impl UpdateIntegration {
    /// Sets the replacement category.
    #[must_use]
    pub fn with_category(mut self, category: IntegrationCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Sets the replacement provider label.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the replacement credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the replacement settings.
    #[must_use]
    pub fn with_settings(mut self, settings: IntegrationSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the replacement endpoints.
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_defaults() {
        let config =
            IntegrationConfig::new("google-calendar", IntegrationCategory::Calendar, "Google");

        assert_eq!(config.status, IntegrationStatus::Pending);
        assert!(!config.settings.sync_enabled);
        assert_eq!(config.settings.sync_interval_minutes, 60);
        assert!(config.settings.rate_limits.is_none());
        assert_eq!(config.created_at, config.updated_at);
    }

    #[test]
    fn apply_replaces_present_fields_only() {
        let mut config = IntegrationConfig::new("stripe", IntegrationCategory::Payment, "Stripe")
            .with_credentials(Credentials::default().with_api_key("sk_live_1"))
            .with_endpoints(Endpoints::new("https://api.stripe.com"));
        let before = config.updated_at;

        config.apply(UpdateIntegration::default().with_provider("Stripe Billing"));

        assert_eq!(config.provider, "Stripe Billing");
        // Untouched fields survive.
        assert_eq!(config.credentials.api_key.as_deref(), Some("sk_live_1"));
        assert_eq!(config.endpoints.base, "https://api.stripe.com");
        assert!(config.updated_at >= before);
    }

    #[test]
    fn apply_replaces_settings_wholesale() {
        let mut config = IntegrationConfig::new("stripe", IntegrationCategory::Payment, "Stripe")
            .with_settings(
                IntegrationSettings::default()
                    .with_sync_enabled(true)
                    .with_sync_interval_minutes(15),
            );

        config.apply(
            UpdateIntegration::default().with_settings(IntegrationSettings::default()),
        );

        // The whole settings block was replaced, not merged.
        assert!(!config.settings.sync_enabled);
        assert_eq!(config.settings.sync_interval_minutes, 60);
    }

    #[test]
    fn credentials_merge_keeps_absent_fields() {
        let mut credentials = Credentials::default()
            .with_api_key("key-1")
            .with_refresh_token("refresh-1")
            .with_extra("region", "eu");

        credentials.merge(
            Credentials::default()
                .with_access_token("token-2")
                .with_extra("tenant", "acme"),
        );

        assert_eq!(credentials.api_key.as_deref(), Some("key-1"));
        assert_eq!(credentials.access_token.as_deref(), Some("token-2"));
        assert_eq!(credentials.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(credentials.extra.get("region").map(String::as_str), Some("eu"));
        assert_eq!(credentials.extra.get("tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn credentials_debug_redacts_values() {
        let credentials = Credentials::default()
            .with_api_key("sk_live_very_secret")
            .with_extra("tenant", "acme");

        let debug = format!("{credentials:?}");
        assert!(!debug.contains("sk_live_very_secret"));
        assert!(!debug.contains("acme"));
        assert!(debug.contains("<set>"));
        assert!(debug.contains("tenant"));
    }

    #[test]
    fn endpoints_named_lookup() {
        let endpoints = Endpoints::new("https://api.example.com")
            .with_named("token", "https://auth.example.com/token");

        assert_eq!(endpoints.url("token"), Some("https://auth.example.com/token"));
        assert_eq!(endpoints.url("missing"), None);
    }

    #[test]
    fn settings_serde_applies_defaults() {
        let settings: IntegrationSettings = serde_json::from_str("{}").expect("deserialize");
        assert!(!settings.sync_enabled);
        assert_eq!(settings.sync_interval_minutes, 60);
        assert!(settings.last_sync.is_none());
    }

    #[test]
    fn category_serde_snake_case() {
        let json = serde_json::to_string(&IntegrationCategory::Crm).expect("serialize");
        assert_eq!(json, "\"crm\"");
        let parsed: IntegrationCategory = serde_json::from_str("\"sms\"").expect("deserialize");
        assert_eq!(parsed, IntegrationCategory::Sms);
    }

    #[test]
    fn status_defaults_to_pending() {
        assert_eq!(IntegrationStatus::default(), IntegrationStatus::Pending);
    }
}
