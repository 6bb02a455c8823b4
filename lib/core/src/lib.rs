//! Core domain types and utilities for the switchboard platform.
//!
//! This crate provides the foundational types, error handling, and shared
//! identifiers used throughout the switchboard integration dispatcher.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{EventId, HandlerId, IntegrationId, ParseIdError};
