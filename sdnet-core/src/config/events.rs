//! Listener queue configuration

use super::defaults::*;
use crate::error::{SdnError, SdnResult};
use serde::{Deserialize, Serialize};

/// What a listener queue does when its consumer falls behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the event for that listener only and log a warning
    DropNewest,
    /// Make the producer wait for queue space
    Backpressure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Per-listener queue capacity
    pub queue_capacity: usize,

    pub overflow_policy: OverflowPolicy,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_LISTENER_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropNewest,
        }
    }
}

impl EventConfig {
    pub fn validate(&self) -> SdnResult<()> {
        if self.queue_capacity == 0 {
            return Err(SdnError::invalid_config(
                "events.queue_capacity",
                self.queue_capacity,
                "must be positive",
            ));
        }
        Ok(())
    }
}
