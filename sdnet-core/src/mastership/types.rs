//! Mastership data model

use crate::types::{DeviceId, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a controller node for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MastershipRole {
    Master,
    Standby,
    None,
}

impl fmt::Display for MastershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MastershipRole::Master => write!(f, "MASTER"),
            MastershipRole::Standby => write!(f, "STANDBY"),
            MastershipRole::None => write!(f, "NONE"),
        }
    }
}

/// Fencing token: the master together with the term it was elected in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MastershipTerm {
    pub master: NodeId,
    pub term_number: u64,
}

impl MastershipTerm {
    pub fn new(master: NodeId, term_number: u64) -> Self {
        Self {
            master,
            term_number,
        }
    }
}

/// Stored state of one device
///
/// The term number is bumped on every change of `master`, including the
/// master going away. `backups` holds the standby nodes in priority order
/// and never contains the master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastershipRecord {
    pub term: u64,
    pub master: Option<NodeId>,
    pub backups: Vec<NodeId>,
}

impl MastershipRecord {
    pub fn role_of(&self, node: &NodeId) -> MastershipRole {
        if self.master.as_ref() == Some(node) {
            MastershipRole::Master
        } else if self.backups.contains(node) {
            MastershipRole::Standby
        } else {
            MastershipRole::None
        }
    }

    pub fn info(&self) -> MastershipInfo {
        let mut roles = Vec::with_capacity(self.backups.len() + 1);
        if let Some(master) = &self.master {
            roles.push((master.clone(), MastershipRole::Master));
        }
        roles.extend(
            self.backups
                .iter()
                .map(|n| (n.clone(), MastershipRole::Standby)),
        );
        MastershipInfo {
            term: self.term,
            master: self.master.clone(),
            roles,
        }
    }

    pub fn mastership_term(&self) -> Option<MastershipTerm> {
        self.master
            .as_ref()
            .map(|m| MastershipTerm::new(m.clone(), self.term))
    }

    /// Make `node` master, bumping the term if the master changes
    pub(crate) fn promote(&mut self, node: Option<NodeId>) {
        if self.master == node {
            return;
        }
        if let Some(node) = &node {
            self.backups.retain(|b| b != node);
        }
        self.master = node;
        self.term += 1;
    }
}

/// Snapshot of a device's mastership: term, master and every node's role,
/// master first and standbys in priority order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MastershipInfo {
    pub term: u64,
    pub master: Option<NodeId>,
    pub roles: Vec<(NodeId, MastershipRole)>,
}

impl MastershipInfo {
    pub fn backups(&self) -> Vec<NodeId> {
        self.roles
            .iter()
            .filter(|(_, role)| *role == MastershipRole::Standby)
            .map(|(node, _)| node.clone())
            .collect()
    }

    pub fn role_of(&self, node: &NodeId) -> MastershipRole {
        self.roles
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, role)| *role)
            .unwrap_or(MastershipRole::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MastershipEvent {
    MasterChanged {
        device_id: DeviceId,
        info: MastershipInfo,
    },
    BackupsChanged {
        device_id: DeviceId,
        info: MastershipInfo,
    },
    /// The term store lost availability; every answer is stale until the
    /// next `MasterChanged`
    Suspended,
}

impl MastershipEvent {
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            MastershipEvent::MasterChanged { device_id, .. }
            | MastershipEvent::BackupsChanged { device_id, .. } => Some(device_id),
            MastershipEvent::Suspended => None,
        }
    }

    pub fn info(&self) -> Option<&MastershipInfo> {
        match self {
            MastershipEvent::MasterChanged { info, .. }
            | MastershipEvent::BackupsChanged { info, .. } => Some(info),
            MastershipEvent::Suspended => None,
        }
    }

    /// Event describing the transition from `old` to `new`, if any
    pub(crate) fn between(
        device_id: &DeviceId,
        old: Option<&MastershipRecord>,
        new: Option<&MastershipRecord>,
    ) -> Option<Self> {
        let empty = MastershipRecord::default();
        let old = old.unwrap_or(&empty);
        let new = new.unwrap_or(&empty);

        if old.master != new.master || old.term != new.term {
            Some(MastershipEvent::MasterChanged {
                device_id: device_id.clone(),
                info: new.info(),
            })
        } else if old.backups != new.backups {
            Some(MastershipEvent::BackupsChanged {
                device_id: device_id.clone(),
                info: new.info(),
            })
        } else {
            None
        }
    }
}
