//! Flow rules fenced by mastership
//!
//! Only the master of a device writes its flow rules, and every write
//! carries the master's term. A node that lost mastership but has not yet
//! noticed is rejected by the fenced map instead of overwriting its
//! successor's rules.

use crate::device::{DriverRegistry, FlowProgrammer};
use crate::error::{SdnError, SdnResult};
use crate::event::{EventListener, ListenerId};
use crate::mastership::{MastershipEvent, MastershipManager, MastershipTerm};
use crate::store::{DeviceFencedMap, Fenced, MapOptions};
use crate::types::{DeviceId, MacAddress, PortNumber, VlanId};
use async_trait::async_trait;
use ipnet::IpNet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowRuleId(String);

impl FlowRuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowRuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match fields; `None` is a wildcard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSelector {
    pub in_port: Option<PortNumber>,
    pub vlan: Option<VlanId>,
    pub ip_dst: Option<IpNet>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowTreatment {
    pub output: PortNumber,
    pub set_eth_dst: Option<MacAddress>,
    pub set_vlan: Option<VlanId>,
}

impl FlowTreatment {
    pub fn output(port: PortNumber) -> Self {
        Self {
            output: port,
            set_eth_dst: None,
            set_vlan: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub id: FlowRuleId,
    pub device_id: DeviceId,
    pub priority: u32,
    pub selector: FlowSelector,
    pub treatment: FlowTreatment,
    /// Application that owns the rule
    pub app_id: String,
}

pub struct FlowRuleStore {
    mastership: Arc<MastershipManager>,
    rules: Arc<DeviceFencedMap<FlowRuleId, FlowRule>>,
    drivers: Option<Arc<DriverRegistry>>,
    follower: Mutex<Option<ListenerId>>,
}

impl FlowRuleStore {
    /// Create the store and start following mastership terms so that a
    /// deposed master is fenced as soon as the new term is known
    pub fn new(
        mastership: Arc<MastershipManager>,
        options: MapOptions,
        drivers: Option<Arc<DriverRegistry>>,
    ) -> SdnResult<Arc<Self>> {
        let rules = Arc::new(DeviceFencedMap::new("flow-rules", options)?);
        Ok(Self::with_rules(mastership, rules, drivers))
    }

    /// Build on an existing rule table, e.g. one shared by several nodes
    pub fn with_rules(
        mastership: Arc<MastershipManager>,
        rules: Arc<DeviceFencedMap<FlowRuleId, FlowRule>>,
        drivers: Option<Arc<DriverRegistry>>,
    ) -> Arc<Self> {
        let follower = mastership.add_listener(Arc::new(TermFollower {
            rules: Arc::downgrade(&rules),
        }));
        Arc::new(Self {
            mastership,
            rules,
            drivers,
            follower: Mutex::new(Some(follower)),
        })
    }

    /// Stop following mastership terms
    pub async fn stop(&self) {
        let follower = self.follower.lock().take();
        if let Some(id) = follower {
            self.mastership.remove_listener(id).await;
        }
    }

    pub fn rules(&self) -> &Arc<DeviceFencedMap<FlowRuleId, FlowRule>> {
        &self.rules
    }

    /// Term under which the local node may write to the device
    pub fn local_term(&self, device_id: &DeviceId) -> SdnResult<MastershipTerm> {
        let not_master = || SdnError::NotMaster {
            node_id: self.mastership.local_node().to_string(),
            device_id: device_id.to_string(),
        };
        if !self.mastership.is_local_master(device_id) {
            return Err(not_master());
        }
        self.mastership
            .get_mastership_term(device_id)?
            .ok_or_else(not_master)
    }

    /// Store and program a rule; only the local master may do this
    #[instrument(skip(self, rule), fields(device = %rule.device_id, rule = %rule.id))]
    pub async fn apply(&self, rule: FlowRule) -> SdnResult<()> {
        let term = self.local_term(&rule.device_id)?;
        self.apply_with_term(rule, &term).await
    }

    /// Store and program a rule under an explicit term
    pub async fn apply_with_term(&self, rule: FlowRule, term: &MastershipTerm) -> SdnResult<()> {
        let device_id = rule.device_id.clone();
        self.rules
            .put(&device_id, rule.id.clone(), rule.clone(), term)
            .await?;
        if let Some(programmer) = self.programmer(&device_id) {
            programmer.install(&rule).await?;
        }
        debug!("Applied flow rule {} on {} (term {})", rule.id, device_id, term.term_number);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, device_id: &DeviceId, id: &FlowRuleId) -> SdnResult<Option<FlowRule>> {
        let term = self.local_term(device_id)?;
        self.remove_with_term(device_id, id, &term).await
    }

    pub async fn remove_with_term(
        &self,
        device_id: &DeviceId,
        id: &FlowRuleId,
        term: &MastershipTerm,
    ) -> SdnResult<Option<FlowRule>> {
        let removed = self.rules.remove(device_id, id, term).await?;
        if let (Some(rule), Some(programmer)) = (&removed, self.programmer(device_id)) {
            programmer.remove(rule).await?;
        }
        Ok(removed)
    }

    pub fn get_rule(&self, device_id: &DeviceId, id: &FlowRuleId) -> SdnResult<Option<Fenced<FlowRule>>> {
        self.rules.get(device_id, id)
    }

    pub fn get_rules(&self, device_id: &DeviceId) -> SdnResult<Vec<FlowRule>> {
        Ok(self
            .rules
            .device_entries(device_id)?
            .into_iter()
            .map(|(_, fenced)| fenced.value)
            .collect())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    fn programmer(&self, device_id: &DeviceId) -> Option<Arc<dyn FlowProgrammer>> {
        let drivers = self.drivers.as_ref()?;
        drivers.driver_for(device_id)?.flow_programmer()
    }
}

struct TermFollower {
    rules: Weak<DeviceFencedMap<FlowRuleId, FlowRule>>,
}

#[async_trait]
impl EventListener<MastershipEvent> for TermFollower {
    async fn on_event(&self, event: MastershipEvent) -> SdnResult<()> {
        if let (MastershipEvent::MasterChanged { device_id, info }, Some(rules)) =
            (&event, self.rules.upgrade())
        {
            rules.observe_term(device_id, info.term).await?;
            info!("Flow rules of {} now fenced at term {}", device_id, info.term);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "flow-term-follower"
    }

    fn is_relevant(&self, event: &MastershipEvent) -> bool {
        matches!(event, MastershipEvent::MasterChanged { .. })
    }
}
