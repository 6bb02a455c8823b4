//! Domain error types for daemon startup.

use std::fmt;

/// Errors raised while loading daemon configuration.
#[derive(Debug)]
pub enum DaemonError {
    /// The configuration sources could not be read.
    Load { details: String },
    /// The configuration was read but did not match the expected shape.
    Parse { details: String },
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { details } => {
                write!(f, "failed to load configuration: {details}")
            }
            Self::Parse { details } => {
                write!(f, "invalid configuration: {details}")
            }
        }
    }
}

impl std::error::Error for DaemonError {}
