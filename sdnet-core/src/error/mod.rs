//! Error handling for sdnet
//!
//! Invalid operations (for example demoting the current master) are
//! rejected synchronously and never retried. Cluster-coordination failures
//! surface either as `StoreUnavailable` (which the mastership layer turns
//! into a `Suspended` event) or as retryable errors consumed by
//! [`crate::patterns::retry`].

pub mod constructors;
pub mod conversions;
pub mod types;

pub use types::{SdnError, SdnResult};

#[cfg(test)]
mod tests;
