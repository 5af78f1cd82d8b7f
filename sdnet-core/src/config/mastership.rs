//! Mastership coordination configuration

use super::defaults::*;
use super::parse_duration_from_env;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mastership service and term store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MastershipConfig {
    /// Bound applied by the synchronous wrappers before falling back to role NONE
    #[serde(with = "humantime_serde")]
    pub sync_timeout: Duration,

    /// Compare-and-swap attempts per term-store write
    pub cas_attempts: u32,

    /// Base delay between CAS attempts
    #[serde(with = "humantime_serde")]
    pub cas_backoff: Duration,

    /// Run the role balancer whenever cluster membership changes
    pub auto_balance: bool,
}

impl Default for MastershipConfig {
    fn default() -> Self {
        Self {
            sync_timeout: duration_ms(DEFAULT_MASTERSHIP_SYNC_TIMEOUT_MS),
            cas_attempts: DEFAULT_MASTERSHIP_CAS_ATTEMPTS,
            cas_backoff: duration_ms(DEFAULT_MASTERSHIP_CAS_BACKOFF_MS),
            auto_balance: DEFAULT_AUTO_BALANCE_ON_MEMBERSHIP_CHANGE,
        }
    }
}

impl MastershipConfig {
    /// Apply `SDNET_MASTERSHIP_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> SdnResult<()> {
        self.sync_timeout =
            parse_duration_from_env("SDNET_MASTERSHIP_SYNC_TIMEOUT_MS", self.sync_timeout);
        self.cas_backoff = parse_duration_from_env("SDNET_MASTERSHIP_CAS_BACKOFF_MS", self.cas_backoff);

        if let Ok(val) = std::env::var("SDNET_MASTERSHIP_CAS_ATTEMPTS") {
            self.cas_attempts = val.parse().map_err(|_| {
                SdnError::invalid_config("SDNET_MASTERSHIP_CAS_ATTEMPTS", &val, "expected an integer")
            })?;
        }

        if let Ok(val) = std::env::var("SDNET_MASTERSHIP_AUTO_BALANCE") {
            self.auto_balance = val.parse().map_err(|_| {
                SdnError::invalid_config("SDNET_MASTERSHIP_AUTO_BALANCE", &val, "expected true or false")
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> SdnResult<()> {
        if self.sync_timeout.is_zero() {
            return Err(SdnError::configuration(
                "mastership.sync_timeout",
                "must be greater than zero",
            ));
        }

        if self.cas_attempts == 0 {
            return Err(SdnError::configuration(
                "mastership.cas_attempts",
                "at least one attempt is required",
            ));
        }

        Ok(())
    }
}
