//! Default configuration values for sdnet
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Mastership defaults
pub const DEFAULT_MASTERSHIP_SYNC_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_MASTERSHIP_CAS_ATTEMPTS: u32 = 8;
pub const DEFAULT_MASTERSHIP_CAS_BACKOFF_MS: u64 = 5;
pub const DEFAULT_AUTO_BALANCE_ON_MEMBERSHIP_CHANGE: bool = false;

// Topology defaults
pub const DEFAULT_TOPOLOGY_MAX_EVENT_BATCH: usize = 256;
pub const DEFAULT_TOPOLOGY_EVENT_QUEUE: usize = 4096;
pub const DEFAULT_PATH_CACHE_ENABLED: bool = true;
pub const DEFAULT_MAX_K_SHORTEST_PATHS: usize = 16;
pub const DEFAULT_SRLG_CANDIDATE_LIMIT: usize = 16;

// Event delivery defaults
pub const DEFAULT_LISTENER_QUEUE_CAPACITY: usize = 1024;

// Route defaults
pub const DEFAULT_REAPER_QUEUE_CAPACITY: usize = 256;

// Meter defaults
pub const DEFAULT_MAX_METERS_PER_DEVICE: u64 = 1024;

// Storage defaults
pub const DEFAULT_STORE_TABLE: &str = "sdnet_consistent_maps";

// Logging defaults
pub const DEFAULT_LOG_FILTER: &str = "info";

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
