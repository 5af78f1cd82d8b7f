//! From implementations converting external error types into SdnError

use super::types::SdnError;

// Storage error conversions
impl From<redb::TransactionError> for SdnError {
    fn from(err: redb::TransactionError) -> Self {
        SdnError::storage("transaction", err)
    }
}

impl From<redb::TableError> for SdnError {
    fn from(err: redb::TableError) -> Self {
        SdnError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for SdnError {
    fn from(err: redb::StorageError) -> Self {
        SdnError::storage("storage_operation", err)
    }
}

impl From<redb::DatabaseError> for SdnError {
    fn from(err: redb::DatabaseError) -> Self {
        SdnError::storage("open_database", err)
    }
}

impl From<redb::CommitError> for SdnError {
    fn from(err: redb::CommitError) -> Self {
        SdnError::storage("commit", err)
    }
}

// Serialization error conversions
impl From<bincode::Error> for SdnError {
    fn from(err: bincode::Error) -> Self {
        SdnError::serialization("bincode", err)
    }
}

impl From<toml::de::Error> for SdnError {
    fn from(err: toml::de::Error) -> Self {
        SdnError::configuration("toml", err.to_string())
    }
}

// System error conversions
impl From<std::io::Error> for SdnError {
    fn from(err: std::io::Error) -> Self {
        SdnError::IoError(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for SdnError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            SdnError::internal(format!("Task panicked: {}", err))
        } else {
            SdnError::internal(format!("Task cancelled: {}", err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for SdnError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SdnError::Timeout {
            operation: "async_operation".to_string(),
            duration: std::time::Duration::ZERO,
        }
    }
}
