//! Storage configuration

use super::defaults::*;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persistence of the consistent maps backing the term and route stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file; `None` keeps every map in memory only
    pub database_path: Option<PathBuf>,

    /// redb table holding every map entry
    pub table_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table_name: DEFAULT_STORE_TABLE.to_string(),
        }
    }
}

impl StorageConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SDNET_STORAGE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> SdnResult<()> {
        if self.table_name.trim().is_empty() {
            return Err(SdnError::configuration(
                "storage.table_name",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
