//! Constructor methods for SdnError
//!
//! Factory helpers that keep call sites short and the variant fields
//! consistently formatted.

use super::types::SdnError;
use std::time::Duration;

impl SdnError {
    /// Create a configuration error with component and message
    ///
    /// # Examples
    /// ```rust
    /// use sdnet_core::error::SdnError;
    ///
    /// let err = SdnError::configuration("mastership.sync_timeout", "must be non-zero");
    /// assert!(err.to_string().contains("mastership.sync_timeout"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        SdnError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error naming the offending value
    pub fn invalid_config<T: std::fmt::Display>(field: &str, value: T, reason: &str) -> Self {
        SdnError::ConfigurationError {
            component: field.to_string(),
            message: format!("Invalid value '{}': {}", value, reason),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SdnError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a precondition-violation error
    pub fn invalid_operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        SdnError::InvalidOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn store_unavailable(store: impl Into<String>) -> Self {
        SdnError::StoreUnavailable {
            store: store.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        SdnError::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        SdnError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn southbound(
        operation: impl Into<String>,
        device_id: impl std::fmt::Display,
        details: impl Into<String>,
    ) -> Self {
        SdnError::Southbound {
            operation: operation.into(),
            device_id: device_id.to_string(),
            details: details.into(),
        }
    }

    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        SdnError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        SdnError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        SdnError::Internal {
            message: message.into(),
        }
    }
}
