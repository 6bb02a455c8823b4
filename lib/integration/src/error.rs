//! Error types for the integration crate.
//!
//! Only configuration, rate-limit, and transport failures cross the public
//! API. Webhook handler failures and sync step failures are absorbed by
//! their components and surface exclusively through the event log:
//! - `ConfigurationError`: invalid or unknown integration definitions
//! - `TransportError`: network-level failures from the HTTP transport
//! - `DispatchError`: everything a dispatched call can fail with

use std::fmt;
use switchboard_core::IntegrationId;

/// Errors from invalid or unknown integration definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No integration registered under this ID.
    NotFound { id: IntegrationId },
    /// An integration with this ID is already registered.
    DuplicateId { id: IntegrationId },
    /// The definition has no base endpoint.
    MissingBaseEndpoint { id: IntegrationId },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => {
                write!(f, "integration not found: {id}")
            }
            Self::DuplicateId { id } => {
                write!(f, "integration already registered: {id}")
            }
            Self::MissingBaseEndpoint { id } => {
                write!(f, "integration '{id}' has no base endpoint")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Network-level errors from the HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection to the service could not be established.
    ConnectionFailed { message: String },
    /// The request did not complete within its deadline.
    Timeout,
    /// The resolved URL was not valid.
    InvalidUrl { url: String, message: String },
    /// The response body could not be read.
    InvalidBody { message: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "connection failed: {message}")
            }
            Self::Timeout => write!(f, "request timed out"),
            Self::InvalidUrl { url, message } => {
                write!(f, "invalid url '{url}': {message}")
            }
            Self::InvalidBody { message } => {
                write!(f, "invalid response body: {message}")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from dispatching an outbound API call.
///
/// An HTTP error status from the remote service is not an error here: the
/// dispatcher returns those responses to the caller and the event log
/// records the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The integration definition was missing or invalid.
    Configuration(ConfigurationError),
    /// The integration's rate limit rejected the call.
    RateLimited { integration_id: IntegrationId },
    /// The transport failed to complete the call.
    Transport(TransportError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(e) => write!(f, "configuration error: {e}"),
            Self::RateLimited { integration_id } => {
                write!(f, "rate limit exceeded for {integration_id}")
            }
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<ConfigurationError> for DispatchError {
    fn from(e: ConfigurationError) -> Self {
        Self::Configuration(e)
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_display() {
        let err = ConfigurationError::NotFound {
            id: IntegrationId::from("google-calendar"),
        };
        assert!(err.to_string().contains("integration not found"));
        assert!(err.to_string().contains("google-calendar"));
    }

    #[test]
    fn duplicate_id_display() {
        let err = ConfigurationError::DuplicateId {
            id: IntegrationId::from("stripe"),
        };
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::ConnectionFailed {
            message: "host unreachable".to_string(),
        };
        assert!(err.to_string().contains("connection failed"));
        assert!(err.to_string().contains("host unreachable"));
    }

    #[test]
    fn dispatch_error_wraps_transport() {
        let err = DispatchError::from(TransportError::Timeout);
        assert!(matches!(err, DispatchError::Transport(TransportError::Timeout)));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn dispatch_error_wraps_configuration() {
        let err = DispatchError::from(ConfigurationError::NotFound {
            id: IntegrationId::from("hubspot"),
        });
        assert!(err.to_string().contains("hubspot"));
    }
}
