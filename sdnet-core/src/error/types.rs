//! Core error types for sdnet
//!
//! This module contains the main SdnError enum with all error variants
//! and the associated Result alias.

use std::time::Duration;
use thiserror::Error;

/// Error type for every sdnet-core operation
///
/// # Error Categories
///
/// - **Logic Errors**: validation, configuration and precondition violations
/// - **Distributed Errors**: suspended primitives, CAS conflicts, stale terms
/// - **Operational Errors**: timeouts, missing entities, southbound failures
/// - **System Errors**: storage, serialization and IO failures
#[derive(Error, Debug)]
pub enum SdnError {
    // Configuration & validation
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid operation '{operation}': {reason}")]
    InvalidOperation { operation: String, reason: String },

    // Distributed primitives
    #[error("Store '{store}' is unavailable (suspended)")]
    StoreUnavailable { store: String },

    #[error("Concurrent modification of '{key}' in '{store}' after {attempts} attempts")]
    ConcurrentModification {
        store: String,
        key: String,
        attempts: u32,
    },

    #[error("Stale mastership term for {device_id}: presented {presented}, current {current}")]
    StaleTerm {
        device_id: String,
        presented: u64,
        current: u64,
    },

    #[error("Node {node_id} is not master for {device_id}")]
    NotMaster { node_id: String, device_id: String },

    // Operational
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Device {device_id} does not provide capability {capability}")]
    CapabilityMissing {
        device_id: String,
        capability: String,
    },

    #[error("Southbound operation '{operation}' failed on {device_id}: {details}")]
    Southbound {
        operation: String,
        device_id: String,
        details: String,
    },

    #[error("Event delivery to '{listener}' failed: {details}")]
    EventDelivery { listener: String, details: String },

    // Storage & serialization
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    // Internal
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SdnError {
    /// Whether the failure is transient and the operation may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SdnError::StoreUnavailable { .. }
                | SdnError::ConcurrentModification { .. }
                | SdnError::Timeout { .. }
        )
    }
}

pub type SdnResult<T> = std::result::Result<T, SdnError>;
