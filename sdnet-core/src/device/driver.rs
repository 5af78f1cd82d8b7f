//! Device drivers and their capabilities
//!
//! A driver advertises what it can do through capability queries; callers
//! ask for a capability and get [`SdnError::CapabilityMissing`] when the
//! device's driver does not provide it.

use crate::error::{SdnError, SdnResult};
use crate::flow::FlowRule;
use crate::mastership::{MastershipRole, RoleApplier};
use crate::types::{DeviceId, NodeId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Tells a device which role the controller holds towards it
#[async_trait]
pub trait RoleHandler: Send + Sync {
    async fn set_role(&self, device_id: &DeviceId, role: MastershipRole) -> SdnResult<()>;
}

/// Installs and removes flow rules on a device
#[async_trait]
pub trait FlowProgrammer: Send + Sync {
    async fn install(&self, rule: &FlowRule) -> SdnResult<()>;

    async fn remove(&self, rule: &FlowRule) -> SdnResult<()>;
}

pub trait DeviceDriver: Send + Sync {
    /// Name used for binding devices to this driver
    fn name(&self) -> &str;

    fn role_handler(&self) -> Option<Arc<dyn RoleHandler>> {
        None
    }

    fn flow_programmer(&self) -> Option<Arc<dyn FlowProgrammer>> {
        None
    }
}

/// Registered drivers and the device to driver bindings
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn DeviceDriver>>>,
    bindings: RwLock<HashMap<DeviceId, String>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, driver: Arc<dyn DeviceDriver>) {
        let name = driver.name().to_string();
        info!("Registering device driver: {}", name);
        self.drivers.write().insert(name, driver);
    }

    /// Bind a device to a registered driver
    pub fn bind(&self, device_id: DeviceId, driver: &str) -> SdnResult<()> {
        if !self.drivers.read().contains_key(driver) {
            return Err(SdnError::not_found(format!(
                "driver '{}' (available: {:?})",
                driver,
                self.list_drivers()
            )));
        }
        debug!("Binding {} to driver {}", device_id, driver);
        self.bindings.write().insert(device_id, driver.to_string());
        Ok(())
    }

    pub fn unbind(&self, device_id: &DeviceId) -> bool {
        self.bindings.write().remove(device_id).is_some()
    }

    pub fn list_drivers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Driver bound to the device, if any
    pub fn driver_for(&self, device_id: &DeviceId) -> Option<Arc<dyn DeviceDriver>> {
        let name = self.bindings.read().get(device_id).cloned()?;
        self.drivers.read().get(&name).cloned()
    }

    fn capability<T: ?Sized>(
        &self,
        device_id: &DeviceId,
        capability: &str,
        query: impl FnOnce(&dyn DeviceDriver) -> Option<Arc<T>>,
    ) -> SdnResult<Arc<T>> {
        let driver = self
            .driver_for(device_id)
            .ok_or_else(|| SdnError::not_found(format!("driver for {}", device_id)))?;
        query(driver.as_ref()).ok_or_else(|| SdnError::CapabilityMissing {
            device_id: device_id.to_string(),
            capability: capability.to_string(),
        })
    }

    pub fn role_handler(&self, device_id: &DeviceId) -> SdnResult<Arc<dyn RoleHandler>> {
        self.capability(device_id, "role-handler", |d| d.role_handler())
    }

    pub fn flow_programmer(&self, device_id: &DeviceId) -> SdnResult<Arc<dyn FlowProgrammer>> {
        self.capability(device_id, "flow-programmer", |d| d.flow_programmer())
    }
}

/// Applies mastership roles through the device's driver
///
/// Devices without a bound driver are skipped; a bound driver without a
/// role handler is an error.
pub struct DriverRoleApplier {
    registry: Arc<DriverRegistry>,
}

impl DriverRoleApplier {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RoleApplier for DriverRoleApplier {
    async fn apply_role(
        &self,
        node: &NodeId,
        device_id: &DeviceId,
        role: MastershipRole,
    ) -> SdnResult<()> {
        if self.registry.driver_for(device_id).is_none() {
            debug!("No driver bound to {}, role {} not pushed", device_id, role);
            return Ok(());
        }
        let handler = self.registry.role_handler(device_id)?;
        debug!("Pushing role {} of {} to {}", role, node, device_id);
        handler.set_role(device_id, role).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        roles: Mutex<Vec<(DeviceId, MastershipRole)>>,
    }

    #[async_trait]
    impl RoleHandler for RecordingHandler {
        async fn set_role(&self, device_id: &DeviceId, role: MastershipRole) -> SdnResult<()> {
            self.roles.lock().push((device_id.clone(), role));
            Ok(())
        }
    }

    struct OpenFlowDriver {
        handler: Arc<RecordingHandler>,
    }

    impl DeviceDriver for OpenFlowDriver {
        fn name(&self) -> &str {
            "openflow"
        }

        fn role_handler(&self) -> Option<Arc<dyn RoleHandler>> {
            Some(self.handler.clone())
        }
    }

    struct PassiveDriver;

    impl DeviceDriver for PassiveDriver {
        fn name(&self) -> &str {
            "passive"
        }
    }

    #[tokio::test]
    async fn test_role_applied_through_driver() {
        let handler = Arc::new(RecordingHandler::default());
        let registry = Arc::new(DriverRegistry::new());
        registry.register(Arc::new(OpenFlowDriver {
            handler: handler.clone(),
        }));
        registry.bind(DeviceId::new("of:1"), "openflow").unwrap();

        let applier = DriverRoleApplier::new(registry);
        applier
            .apply_role(&NodeId::new("n1"), &DeviceId::new("of:1"), MastershipRole::Master)
            .await
            .unwrap();
        applier
            .apply_role(&NodeId::new("n1"), &DeviceId::new("of:2"), MastershipRole::Master)
            .await
            .unwrap();

        assert_eq!(
            *handler.roles.lock(),
            vec![(DeviceId::new("of:1"), MastershipRole::Master)]
        );
    }

    #[tokio::test]
    async fn test_missing_capability() {
        let registry = Arc::new(DriverRegistry::new());
        registry.register(Arc::new(PassiveDriver));
        registry.bind(DeviceId::new("of:1"), "passive").unwrap();

        assert!(matches!(
            registry.flow_programmer(&DeviceId::new("of:1")),
            Err(SdnError::CapabilityMissing { .. })
        ));
        let applier = DriverRoleApplier::new(registry);
        assert!(applier
            .apply_role(&NodeId::new("n1"), &DeviceId::new("of:1"), MastershipRole::Standby)
            .await
            .is_err());
    }

    #[test]
    fn test_bind_unknown_driver() {
        let registry = DriverRegistry::new();
        assert!(matches!(
            registry.bind(DeviceId::new("of:1"), "netconf"),
            Err(SdnError::NotFound { .. })
        ));
    }
}
