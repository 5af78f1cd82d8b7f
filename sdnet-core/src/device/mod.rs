//! Device-facing types: inbound network events and driver capabilities

pub mod driver;
pub mod events;

pub use driver::{DeviceDriver, DriverRegistry, DriverRoleApplier, FlowProgrammer, RoleHandler};
pub use events::NetworkEvent;
