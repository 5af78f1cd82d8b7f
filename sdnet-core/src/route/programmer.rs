//! Installs best routes on the next hop's device
//!
//! Only the master of the device a next hop is attached to programs the
//! route, through the fenced [`FlowRuleStore`]. Events for devices this
//! node does not master are ignored.

use super::types::{ResolvedRoute, RouteEvent};
use crate::error::{SdnError, SdnResult};
use crate::event::EventListener;
use crate::flow::{FlowRule, FlowRuleId, FlowRuleStore, FlowSelector, FlowTreatment};
use crate::types::{DeviceId, VlanId};
use async_trait::async_trait;
use ipnet::IpNet;
use std::sync::Arc;
use tracing::debug;

const ROUTING_APP: &str = "routing";
const BASE_PRIORITY: u32 = 100;

pub struct RouteProgrammer {
    flows: Arc<FlowRuleStore>,
}

impl RouteProgrammer {
    pub fn new(flows: Arc<FlowRuleStore>) -> Arc<Self> {
        Arc::new(Self { flows })
    }

    pub fn rule_id(prefix: &IpNet) -> FlowRuleId {
        FlowRuleId::new(format!("route:{}", prefix))
    }

    /// Flow rule forwarding the prefix to the resolved next hop; more
    /// specific prefixes get a higher priority
    pub fn rule_for(route: &ResolvedRoute) -> FlowRule {
        let prefix = route.prefix();
        FlowRule {
            id: Self::rule_id(&prefix),
            device_id: route.location.device_id.clone(),
            priority: BASE_PRIORITY + prefix.prefix_len() as u32 * 10,
            selector: FlowSelector {
                ip_dst: Some(prefix),
                ..FlowSelector::default()
            },
            treatment: FlowTreatment {
                output: route.location.port,
                set_eth_dst: Some(route.next_hop_mac),
                set_vlan: (route.next_hop_vlan != VlanId::NONE).then_some(route.next_hop_vlan),
            },
            app_id: ROUTING_APP.to_string(),
        }
    }

    async fn install(&self, route: &ResolvedRoute) -> SdnResult<()> {
        skip_if_remote(self.flows.apply(Self::rule_for(route)).await)
    }

    async fn uninstall(&self, device_id: &DeviceId, prefix: &IpNet) -> SdnResult<()> {
        skip_if_remote(self.flows.remove(device_id, &Self::rule_id(prefix)).await.map(|_| ()))
    }
}

fn skip_if_remote(result: SdnResult<()>) -> SdnResult<()> {
    match result {
        Err(SdnError::NotMaster { device_id, .. }) => {
            debug!("Not master of {}, leaving route to its master", device_id);
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl EventListener<RouteEvent> for RouteProgrammer {
    async fn on_event(&self, event: RouteEvent) -> SdnResult<()> {
        match event {
            RouteEvent::RouteAdded(route) => self.install(&route).await,
            RouteEvent::RouteUpdated { route, previous } => {
                if previous.location.device_id != route.location.device_id {
                    self.uninstall(&previous.location.device_id, &previous.prefix())
                        .await?;
                }
                self.install(&route).await
            }
            RouteEvent::RouteRemoved(route) => {
                self.uninstall(&route.location.device_id, &route.prefix())
                    .await
            }
            RouteEvent::AlternativeRoutesChanged { .. } => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "route-programmer"
    }
}
