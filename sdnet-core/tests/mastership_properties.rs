//! Property-based tests for the mastership term store

mod common;

use common::{device, node, term_store};
use proptest::prelude::*;
use sdnet_core::mastership::{MastershipRole, MastershipStore};
use sdnet_core::types::DeviceId;

const NODES: [&str; 3] = ["n1", "n2", "n3"];
const DEVICES: [&str; 2] = ["of:1", "of:2"];

#[derive(Debug, Clone)]
enum Op {
    Request(usize, usize),
    SetMaster(usize, usize),
    SetStandby(usize, usize),
    Relinquish(usize, usize),
    Demote(usize, usize),
    RelinquishAll(usize),
    Reelect(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let n = 0..NODES.len();
    let d = 0..DEVICES.len();
    prop_oneof![
        (n.clone(), d.clone()).prop_map(|(n, d)| Op::Request(n, d)),
        (n.clone(), d.clone()).prop_map(|(n, d)| Op::SetMaster(n, d)),
        (n.clone(), d.clone()).prop_map(|(n, d)| Op::SetStandby(n, d)),
        (n.clone(), d.clone()).prop_map(|(n, d)| Op::Relinquish(n, d)),
        (n.clone(), d.clone()).prop_map(|(n, d)| Op::Demote(n, d)),
        n.prop_map(Op::RelinquishAll),
        d.prop_map(Op::Reelect),
    ]
}

async fn apply(store: &MastershipStore, op: &Op) {
    // demoting the master is rejected; every other op must succeed
    let result = match op {
        Op::Request(n, d) => store
            .request_role(&node(NODES[*n]), &device(DEVICES[*d]))
            .await
            .map(|_| ()),
        Op::SetMaster(n, d) => store
            .set_master(&node(NODES[*n]), &device(DEVICES[*d]))
            .await
            .map(|_| ()),
        Op::SetStandby(n, d) => store
            .set_standby(&node(NODES[*n]), &device(DEVICES[*d]))
            .await
            .map(|_| ()),
        Op::Relinquish(n, d) => store
            .relinquish_role(&node(NODES[*n]), &device(DEVICES[*d]))
            .await
            .map(|_| ()),
        Op::Demote(n, d) => {
            let _ = store
                .demote(&node(NODES[*n]), &device(DEVICES[*d]))
                .await;
            Ok(())
        }
        Op::RelinquishAll(n) => store
            .relinquish_all_roles(&node(NODES[*n]))
            .await
            .map(|_| ()),
        Op::Reelect(d) => store.reelect(&device(DEVICES[*d])).await.map(|_| ()),
    };
    result.expect("mastership operation");
}

fn snapshot(store: &MastershipStore, id: &DeviceId) -> (u64, Option<String>) {
    let info = store.get_mastership(id).unwrap();
    (info.term, info.master.map(|m| m.to_string()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_terms_increase_on_master_change(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (_, store) = term_store(&NODES).await;

            for op in &ops {
                let before: Vec<_> = DEVICES.iter().map(|d| snapshot(&store, &device(d))).collect();
                apply(&store, op).await;
                let after: Vec<_> = DEVICES.iter().map(|d| snapshot(&store, &device(d))).collect();

                for (b, a) in before.iter().zip(after.iter()) {
                    prop_assert!(a.0 >= b.0, "term went backwards after {:?}", op);
                    if a.1 != b.1 {
                        prop_assert!(a.0 > b.0, "master changed without a new term after {:?}", op);
                    } else {
                        prop_assert_eq!(a.0, b.0, "term moved without a master change after {:?}", op);
                    }
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_single_master_and_unique_roles(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (_, store) = term_store(&NODES).await;
            for op in &ops {
                apply(&store, op).await;
            }

            for d in DEVICES {
                let id = device(d);
                let masters = NODES
                    .iter()
                    .filter(|n| store.get_role(&node(n), &id).unwrap() == MastershipRole::Master)
                    .count();
                prop_assert!(masters <= 1);

                let nodes = store.get_nodes(&id).unwrap();
                let mut unique = nodes.clone();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), nodes.len());

                let info = store.get_mastership(&id).unwrap();
                if let Some(master) = &info.master {
                    prop_assert!(!info.backups().contains(master));
                }
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_set_master_is_idempotent(ops in prop::collection::vec(op_strategy(), 0..20), n in 0..NODES.len()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let (_, store) = term_store(&NODES).await;
            for op in &ops {
                apply(&store, op).await;
            }
            let id = device(DEVICES[0]);
            store.set_master(&node(NODES[n]), &id).await.unwrap();
            let term = store.get_term_for(&id).unwrap();

            let event = store.set_master(&node(NODES[n]), &id).await.unwrap();
            prop_assert!(event.is_none());
            prop_assert_eq!(store.get_term_for(&id).unwrap(), term);
            Ok(())
        })?;
    }
}
