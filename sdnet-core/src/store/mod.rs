//! Distributed state primitives
//!
//! [`ConsistentMap`] is the only shared mutable state in the system. The
//! mastership term store, the route store, the flow store and the meter
//! store are all built on top of it and mutate it exclusively through
//! single-key conditional writes.

pub mod consistent_map;
pub mod fenced;
pub mod persistence;

pub use consistent_map::{
    ConsistentMap, MapEvent, MapKey, MapOptions, MapUpdate, MapValue, StoreStatus, Versioned,
};
pub use fenced::{DeviceFencedMap, Fenced};
pub use persistence::MapPersistence;
