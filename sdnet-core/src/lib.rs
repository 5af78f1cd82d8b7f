//! sdnet-core: coordination core of an SDN controller cluster
//!
//! - [`mastership`]: per-device master election fenced by monotonic terms
//! - [`topology`]: immutable topology snapshots with clusters, broadcast
//!   trees and lazily computed paths
//! - [`graph`]: the path search algorithms behind the snapshots
//! - [`route`], [`flow`] and [`meter`]: state pushed to devices by their
//!   master only
//! - [`store`]: the replicated map every shared table is built on

pub mod cluster;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod event;
pub mod flow;
pub mod graph;
pub mod mastership;
pub mod meter;
pub mod metrics_otel;
pub mod patterns;
pub mod reaper;
pub mod route;
pub mod store;
pub mod topology;
pub mod tracing_otel;
pub mod types;

pub use config::SdnConfig;
pub use controller::SdnController;
pub use error::{SdnError, SdnResult};
pub use mastership::{MastershipEvent, MastershipManager, MastershipRole, MastershipTerm};
pub use topology::{Topology, TopologyManager};
pub use types::{ConnectPoint, DeviceId, Host, Link, NodeId};
