//! In-memory integration registry.
//!
//! The registry owns the authoritative copy of every integration definition
//! plus the rate limiter bound to it. Components take per-operation
//! snapshots via [`IntegrationRegistry::get`]; nothing holds a long-lived
//! copy, so updates are visible to the next operation.

use crate::config::{
    Credentials, IntegrationCategory, IntegrationConfig, IntegrationStatus, UpdateIntegration,
};
use crate::error::ConfigurationError;
use crate::rate_limit::SlidingWindowLimiter;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use switchboard_core::IntegrationId;

#[derive(Debug)]
struct StoredIntegration {
    config: IntegrationConfig,
    /// Registration order, for stable listing.
    sequence: u64,
}

/// Store of integration definitions and their rate limiters.
///
/// Lock guards are never held across an await point; the limiter map is
/// only ever taken while holding the entry map's write lock (during
/// registration), so the two cannot deadlock.
#[derive(Debug)]
pub struct IntegrationRegistry {
    entries: RwLock<HashMap<IntegrationId, StoredIntegration>>,
    limiters: RwLock<HashMap<IntegrationId, Arc<SlidingWindowLimiter>>>,
    next_sequence: AtomicU64,
}

impl IntegrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            limiters: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Registers a new integration.
    ///
    /// The caller's `status`, `created_at`, and `updated_at` are ignored:
    /// registration stamps fresh timestamps and starts the integration in
    /// `Pending` until its first connection test. A limiter is bound iff the
    /// settings declare rate limits.
    ///
    /// # Errors
    ///
    /// Returns an error when the ID is already taken or the definition has
    /// no base endpoint.
    pub fn register(
        &self,
        mut config: IntegrationConfig,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        if config.endpoints.base.trim().is_empty() {
            return Err(ConfigurationError::MissingBaseEndpoint {
                id: config.id.clone(),
            });
        }

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&config.id) {
            return Err(ConfigurationError::DuplicateId {
                id: config.id.clone(),
            });
        }

        let now = Utc::now();
        config.status = IntegrationStatus::Pending;
        config.created_at = now;
        config.updated_at = now;

        if let Some(limits) = config.settings.rate_limits {
            self.limiters
                .write()
                .unwrap()
                .insert(config.id.clone(), Arc::new(SlidingWindowLimiter::new(limits)));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            config.id.clone(),
            StoredIntegration {
                config: config.clone(),
                sequence,
            },
        );

        tracing::info!(
            integration_id = %config.id,
            provider = %config.provider,
            category = ?config.category,
            "integration registered"
        );
        Ok(config)
    }

    /// Applies a partial update to an existing integration.
    ///
    /// Present fields replace the stored field wholesale. The bound rate
    /// limiter is deliberately left alone even when the update changes
    /// `rate_limits`; re-register to reset admission history.
    ///
    /// # Errors
    ///
    /// Returns an error when no integration has this ID.
    pub fn update(
        &self,
        id: &IntegrationId,
        update: UpdateIntegration,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ConfigurationError::NotFound { id: id.clone() })?;

        entry.config.apply(update);
        tracing::debug!(integration_id = %id, "integration updated");
        Ok(entry.config.clone())
    }

    /// Returns a snapshot of an integration definition.
    #[must_use]
    pub fn get(&self, id: &IntegrationId) -> Option<IntegrationConfig> {
        let entries = self.entries.read().unwrap();
        entries.get(id).map(|entry| entry.config.clone())
    }

    /// Returns snapshots of all integrations in registration order,
    /// optionally filtered by category.
    #[must_use]
    pub fn list(&self, category: Option<IntegrationCategory>) -> Vec<IntegrationConfig> {
        let entries = self.entries.read().unwrap();
        let mut matched: Vec<&StoredIntegration> = entries
            .values()
            .filter(|entry| match category {
                Some(category) => entry.config.category == category,
                None => true,
            })
            .collect();
        matched.sort_by_key(|entry| entry.sequence);
        matched.into_iter().map(|entry| entry.config.clone()).collect()
    }

    /// Returns the rate limiter bound to an integration, if one was
    /// declared at registration.
    #[must_use]
    pub fn limiter(&self, id: &IntegrationId) -> Option<Arc<SlidingWindowLimiter>> {
        let limiters = self.limiters.read().unwrap();
        limiters.get(id).map(Arc::clone)
    }

    /// Returns the number of registered integrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the lifecycle status. Connection testing owns this transition.
    pub(crate) fn set_status(
        &self,
        id: &IntegrationId,
        status: IntegrationStatus,
    ) -> Result<(), ConfigurationError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ConfigurationError::NotFound { id: id.clone() })?;
        entry.config.status = status;
        entry.config.updated_at = Utc::now();
        Ok(())
    }

    /// Records the completion time of a successful sync.
    pub(crate) fn touch_last_sync(
        &self,
        id: &IntegrationId,
        at: DateTime<Utc>,
    ) -> Result<(), ConfigurationError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ConfigurationError::NotFound { id: id.clone() })?;
        entry.config.settings.last_sync = Some(at);
        entry.config.updated_at = Utc::now();
        Ok(())
    }

    /// Merges fresh credential material into an integration.
    pub(crate) fn merge_credentials(
        &self,
        id: &IntegrationId,
        credentials: Credentials,
    ) -> Result<IntegrationConfig, ConfigurationError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| ConfigurationError::NotFound { id: id.clone() })?;
        entry.config.credentials.merge(credentials);
        entry.config.updated_at = Utc::now();
        Ok(entry.config.clone())
    }
}

impl Default for IntegrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
