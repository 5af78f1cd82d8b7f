//! Device mastership
//!
//! - [`MastershipStore`]: the term store, one record per device
//! - [`MastershipManager`]: the local node's view and role requests
//! - [`RoleBalancer`]: spreads masterships over live nodes

pub mod balancer;
pub mod service;
pub mod store;
pub mod types;

pub use balancer::{BalanceReport, RoleBalancer, RoleMove};
pub use service::{MastershipManager, RoleApplier};
pub use store::MastershipStore;
pub use types::{MastershipEvent, MastershipInfo, MastershipRecord, MastershipRole, MastershipTerm};
