//! Common patterns shared across sdnet subsystems

pub mod retry;

pub use retry::{retry, BackoffStrategy, RetryConfig};
