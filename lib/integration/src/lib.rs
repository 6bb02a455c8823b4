//! External service integrations for the switchboard platform.
//!
//! This crate provides:
//!
//! - **Registry**: Integration definitions, credentials, and lifecycle status
//! - **Rate Limiting**: Sliding-window limits per integration across three windows
//! - **Dispatcher**: Authenticated outbound API calls with latency capture
//! - **Webhooks**: Handler registration and isolated concurrent fan-out
//! - **Sync**: Pull/push orchestration over provider adapters
//! - **Service**: One facade wiring the pieces to the shared event log

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod reqwest;
pub mod service;
pub mod sync;
pub mod transport;
pub mod webhook;

pub use config::{
    Credentials, Endpoints, IntegrationCategory, IntegrationConfig, IntegrationSettings,
    IntegrationStatus, UpdateIntegration,
};
pub use dispatcher::{ApiCall, ApiDispatcher};
pub use error::{ConfigurationError, DispatchError, TransportError};
pub use rate_limit::{RateLimits, SlidingWindowLimiter, WindowUsage};
pub use registry::IntegrationRegistry;
pub use self::reqwest::{HttpTransportConfig, ReqwestTransport};
pub use service::{IntegrationService, ServiceConfig};
pub use sync::{
    EndpointSyncAdapter, MockSyncAdapter, SyncAdapter, SyncDirection, SyncError, SyncOrchestrator,
    SyncOutcome, SyncSkipReason,
};
pub use transport::{HttpMethod, MockTransport, Transport, TransportRequest, TransportResponse};
pub use webhook::{
    DEFAULT_HANDLER_TIMEOUT, HandlerError, WebhookDelivery, WebhookHandler, WebhookRouter,
};
