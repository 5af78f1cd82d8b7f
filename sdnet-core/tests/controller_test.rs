//! Two controller nodes sharing replicated state in one process

mod common;

use common::{device, host, node};
use ipnet::IpNet;
use pretty_assertions::assert_eq;
use sdnet_core::config::SdnConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use sdnet_core::device::{DeviceDriver, NetworkEvent, RoleHandler};
use sdnet_core::flow::FlowRuleId;
use sdnet_core::mastership::MastershipRole;
use sdnet_core::meter::{Meter, MeterUnit};
use sdnet_core::route::{Route, RouteSource};
use sdnet_core::types::{ConnectPoint, DeviceId, PortNumber};
use sdnet_core::{tracing_otel, SdnController, SdnResult};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

async fn cluster() -> (Arc<SdnController>, Arc<SdnController>) {
    tracing_otel::init_test_tracing();
    let first = SdnController::start(SdnConfig::test("n1")).await.unwrap();
    let second = SdnController::join(SdnConfig::test("n2"), &first).await.unwrap();
    (first, second)
}

fn route(prefix: &str, next_hop: &str, origin: &str) -> Route {
    let prefix: IpNet = prefix.parse().unwrap();
    let next_hop: IpAddr = next_hop.parse().unwrap();
    Route::new(RouteSource::Static, prefix, next_hop, node(origin)).unwrap()
}

#[derive(Default)]
struct RecordingDriver {
    roles: Arc<Mutex<Vec<(DeviceId, MastershipRole)>>>,
}

struct RecordingHandler {
    roles: Arc<Mutex<Vec<(DeviceId, MastershipRole)>>>,
}

#[async_trait]
impl RoleHandler for RecordingHandler {
    async fn set_role(&self, device_id: &DeviceId, role: MastershipRole) -> SdnResult<()> {
        self.roles.lock().push((device_id.clone(), role));
        Ok(())
    }
}

impl DeviceDriver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    fn role_handler(&self) -> Option<Arc<dyn RoleHandler>> {
        Some(Arc::new(RecordingHandler {
            roles: self.roles.clone(),
        }))
    }
}

/// Bind a recording driver to `device` on `controller`
fn record_roles(controller: &SdnController, device: &DeviceId) -> Arc<Mutex<Vec<(DeviceId, MastershipRole)>>> {
    let driver = Arc::new(RecordingDriver::default());
    let roles = driver.roles.clone();
    controller.drivers().register(driver);
    controller.drivers().bind(device.clone(), "recording").unwrap();
    roles
}

/// Poll `check` until it holds or two seconds pass
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_join_shares_mastership() {
    let (n1, n2) = cluster().await;
    let of1 = device("of:1");

    assert_eq!(n1.mastership().request_role_for(&of1).await.unwrap(), MastershipRole::Master);
    assert_eq!(n2.mastership().request_role_for(&of1).await.unwrap(), MastershipRole::Standby);

    assert!(n1.mastership().is_local_master(&of1));
    assert!(!n2.mastership().is_local_master(&of1));
    assert_eq!(n2.mastership().get_master_for(&of1).unwrap(), Some(node("n1")));
    assert_eq!(
        n2.mastership().get_nodes_for(&of1).unwrap(),
        vec![node("n1"), node("n2")]
    );
    assert_eq!(n1.membership().active_nodes(), vec![node("n1"), node("n2")]);
}

#[tokio::test]
async fn test_routes_are_programmed_by_the_master_only() {
    let (n1, n2) = cluster().await;
    let of1 = device("of:1");
    n1.mastership().request_role_for(&of1).await.unwrap();
    n2.mastership().request_role_for(&of1).await.unwrap();

    n2.submit(vec![NetworkEvent::HostAdded(host("10.0.0.1", "of:1", 1))])
        .await
        .unwrap();
    n2.routes()
        .update(vec![route("10.0.0.0/8", "10.0.0.1", "n2")])
        .await
        .unwrap();

    let id = FlowRuleId::new("route:10.0.0.0/8");
    let flows = n1.flows().clone();
    let installed = eventually(|| {
        let flows = flows.clone();
        let (of1, id) = (of1.clone(), id.clone());
        async move { flows.get_rule(&of1, &id).ok().flatten().is_some() }
    })
    .await;
    assert!(installed);

    let fenced = n2.flows().get_rule(&of1, &id).unwrap().unwrap();
    assert_eq!(fenced.term.master, node("n1"));
    assert_eq!(fenced.term.term_number, 1);
    assert_eq!(fenced.value.treatment.output, PortNumber(1));
    assert_eq!(n1.flows().rule_count(), 1);

    // the standby may read but not write
    assert!(n2.flows().remove(&of1, &id).await.is_err());
    assert!(n1.flows().get_rule(&of1, &id).unwrap().is_some());
}

#[tokio::test]
async fn test_longest_prefix_match_across_nodes() {
    let (n1, n2) = cluster().await;
    n1.submit(vec![
        NetworkEvent::HostAdded(host("10.0.0.1", "of:1", 1)),
        NetworkEvent::HostAdded(host("10.0.0.2", "of:1", 2)),
    ])
    .await
    .unwrap();
    n1.routes()
        .update(vec![
            route("10.0.0.0/8", "10.0.0.1", "n1"),
            route("10.1.0.0/16", "10.0.0.2", "n2"),
        ])
        .await
        .unwrap();

    let wide = n2
        .routes()
        .longest_prefix_match("10.2.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(wide.prefix(), "10.0.0.0/8".parse::<IpNet>().unwrap());

    let narrow = n2
        .routes()
        .longest_prefix_match("10.1.2.3".parse().unwrap())
        .unwrap();
    assert_eq!(narrow.prefix(), "10.1.0.0/16".parse::<IpNet>().unwrap());
    assert_eq!(narrow.location, ConnectPoint::new("of:1", 2));

    assert!(n2
        .routes()
        .longest_prefix_match("192.168.1.1".parse().unwrap())
        .is_none());

    n2.routes()
        .withdraw(vec![route("10.1.0.0/16", "10.0.0.2", "n2")])
        .await
        .unwrap();
    let fallback = n1
        .routes()
        .longest_prefix_match("10.1.2.3".parse().unwrap())
        .unwrap();
    assert_eq!(fallback.prefix(), "10.0.0.0/8".parse::<IpNet>().unwrap());
}

#[tokio::test]
async fn test_departed_node_is_reaped() {
    let (n1, n2) = cluster().await;
    let of2 = device("of:2");
    n2.mastership().request_role_for(&of2).await.unwrap();
    n1.mastership().request_role_for(&of2).await.unwrap();
    n1.submit(vec![NetworkEvent::HostAdded(host("10.0.0.1", "of:1", 1))])
        .await
        .unwrap();
    n2.routes()
        .update(vec![route("192.168.0.0/16", "10.0.0.1", "n2")])
        .await
        .unwrap();
    assert_eq!(n1.routes().prefix_count(), 1);

    n1.membership().deactivate(&node("n2")).await;

    let mastership = n1.mastership().clone();
    let routes = n1.routes().clone();
    let reaped = eventually(|| {
        let (mastership, routes, of2) = (mastership.clone(), routes.clone(), of2.clone());
        async move { mastership.is_local_master(&of2) && routes.prefix_count() == 0 }
    })
    .await;
    assert!(reaped);

    let term = n1.mastership().get_mastership_term(&of2).unwrap().unwrap();
    assert_eq!(term.master, node("n1"));
    assert_eq!(term.term_number, 2);
}

#[tokio::test]
async fn test_shutdown_hands_over_roles() {
    let (n1, n2) = cluster().await;
    let of3 = device("of:3");
    n1.mastership().request_role_for(&of3).await.unwrap();
    n2.mastership().request_role_for(&of3).await.unwrap();

    n1.shutdown().await.unwrap();

    assert!(!n2.membership().is_active(&node("n1")));
    assert_eq!(n2.mastership().get_master_for(&of3).unwrap(), Some(node("n2")));
    assert_eq!(n2.mastership().get_local_role(&of3), MastershipRole::Master);
}

#[tokio::test]
async fn test_stopped_node_no_longer_follows_mastership() {
    let (n1, n2) = cluster().await;
    let of1 = device("of:1");
    let live = record_roles(&n1, &of1);
    let stopped = record_roles(&n2, &of1);

    n2.shutdown().await.unwrap();
    n1.mastership().request_role_for(&of1).await.unwrap();

    let pushed = eventually(|| {
        let live = live.clone();
        async move { !live.lock().is_empty() }
    })
    .await;
    assert!(pushed);
    assert_eq!(live.lock().clone(), vec![(of1.clone(), MastershipRole::Master)]);
    assert!(stopped.lock().is_empty());
}

#[tokio::test]
async fn test_meters_are_shared_and_purged_with_their_device() {
    let (n1, n2) = cluster().await;
    let of1 = device("of:1");
    n1.mastership().request_role_for(&of1).await.unwrap();
    n2.mastership().request_role_for(&of1).await.unwrap();

    let id = n1.meters().allocate_meter_id(&of1).await.unwrap();
    n1.meters()
        .add_or_update_meter(Meter::new("of:1", id, MeterUnit::KilobitsPerSecond, Vec::new()))
        .await
        .unwrap();
    assert_eq!(n2.meters().get_meters(&of1).unwrap().len(), 1);
    assert!(n2.meters().allocate_meter_id(&of1).await.is_err());

    n2.submit(vec![NetworkEvent::DeviceRemoved(of1.clone())])
        .await
        .unwrap();
    assert_eq!(n1.meters().meter_count(), 0);
    assert!(n1.meters().get_meter(&of1, id).unwrap().is_none());
}
