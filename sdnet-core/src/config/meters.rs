//! Meter store configuration

use super::defaults::*;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Highest meter id handed out per device; ids start at 1
    pub max_meters_per_device: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            max_meters_per_device: DEFAULT_MAX_METERS_PER_DEVICE,
        }
    }
}

impl MeterConfig {
    pub fn validate(&self) -> SdnResult<()> {
        if self.max_meters_per_device == 0 {
            return Err(SdnError::configuration(
                "meters.max_meters_per_device",
                "must be positive",
            ));
        }
        Ok(())
    }
}
