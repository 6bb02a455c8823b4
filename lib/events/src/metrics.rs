//! Rolling metrics derived from the event log.
//!
//! Metrics are computed on demand over the retained outbound API call
//! events; nothing is pre-aggregated. Events evicted from the bounded log
//! no longer contribute.

use crate::event::{EventStatus, EventType, IntegrationEvent};
use crate::log::EventLog;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use switchboard_core::IntegrationId;

/// Trailing window over which metrics are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsTimeframe {
    /// The trailing hour.
    Hour,
    /// The trailing 24 hours.
    Day,
    /// The trailing 7 days.
    Week,
}

impl MetricsTimeframe {
    /// Returns the window length.
    #[must_use]
    pub fn window(self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
            Self::Week => Duration::weeks(1),
        }
    }
}

/// Request metrics for one integration over one timeframe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationMetrics {
    /// Total API calls attempted in the window.
    pub total_requests: u64,
    /// Calls that completed with a success status.
    pub successful_requests: u64,
    /// Calls that failed.
    pub failed_requests: u64,
    /// Mean latency in milliseconds over calls that reported one.
    pub average_response_time_ms: u64,
    /// Failed calls as a percentage of the total (0 when there were none).
    pub error_rate: f64,
}

impl IntegrationMetrics {
    /// Computes metrics from an event iterator.
    ///
    /// Only `ApiCall` events for `integration_id` with a timestamp inside
    /// the trailing window ending at `now` are counted.
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a IntegrationEvent>,
        integration_id: &IntegrationId,
        timeframe: MetricsTimeframe,
        now: DateTime<Utc>,
    ) -> Self {
        let cutoff = now - timeframe.window();

        let mut total = 0u64;
        let mut successful = 0u64;
        let mut failed = 0u64;
        let mut latency_sum = 0u64;
        let mut latency_samples = 0u64;

        for event in events {
            if event.event_type != EventType::ApiCall
                || &event.integration_id != integration_id
                || event.timestamp <= cutoff
            {
                continue;
            }

            total += 1;
            match event.status {
                EventStatus::Success => successful += 1,
                EventStatus::Failed => failed += 1,
                EventStatus::Pending => {}
            }
            if let Some(millis) = event.metadata.response_time_ms {
                latency_sum = latency_sum.saturating_add(millis);
                latency_samples += 1;
            }
        }

        let average_response_time_ms = if latency_samples > 0 {
            latency_sum / latency_samples
        } else {
            0
        };
        let error_rate = if total > 0 {
            (failed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            average_response_time_ms,
            error_rate,
        }
    }
}

impl EventLog {
    /// Computes rolling request metrics for an integration.
    #[must_use]
    pub fn metrics(
        &self,
        integration_id: &IntegrationId,
        timeframe: MetricsTimeframe,
    ) -> IntegrationMetrics {
        self.metrics_at(integration_id, timeframe, Utc::now())
    }

    /// Computes rolling request metrics with an explicit window end.
    #[must_use]
    pub fn metrics_at(
        &self,
        integration_id: &IntegrationId,
        timeframe: MetricsTimeframe,
        now: DateTime<Utc>,
    ) -> IntegrationMetrics {
        self.with_events(|events| {
            IntegrationMetrics::from_events(events.iter(), integration_id, timeframe, now)
        })
    }
}
