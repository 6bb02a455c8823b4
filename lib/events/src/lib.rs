//! Integration event log and metrics for the switchboard platform.
//!
//! This crate provides:
//!
//! - **Events**: Typed records of sync, webhook, API call, and auth activity
//! - **Event Log**: Bounded in-memory log with a single writer task
//! - **Metrics**: Rolling request statistics over trailing windows

pub mod event;
pub mod log;
pub mod metrics;

pub use event::{EventDirection, EventMetadata, EventStatus, EventType, IntegrationEvent};
pub use log::{DEFAULT_CAPACITY, EventLog};
pub use metrics::{IntegrationMetrics, MetricsTimeframe};
