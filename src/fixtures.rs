//! Simulated fleets and clusters shared by unit tests.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{add_instance, create_cluster};
use crate::clusterset::{create_cluster_set, create_replica_cluster};
use crate::console::NonInteractiveConsole;
use crate::context::{AdminContext, ClusterHandle, ClusterSetHandle, EngineSettings};
use crate::gateway::SimFleet;
use crate::metadata::TopologyMetadata;
use crate::options::{AddInstanceOptions, CreateClusterOptions, CreateClusterSetOptions, CreateReplicaClusterOptions};
use crate::topology::InstanceAddress;

pub(crate) fn addr(port: u16) -> InstanceAddress {
    InstanceAddress::new("127.0.0.1", port)
}

pub(crate) fn fast_context(fleet: &SimFleet) -> AdminContext {
    let settings = EngineSettings {
        poll_interval: Duration::from_millis(1),
        state_wait_attempts: 5,
        ..EngineSettings::default()
    };
    AdminContext::new(Arc::new(fleet.clone()), Arc::new(NonInteractiveConsole), settings)
}

/// A running cluster on a simulated fleet.
pub(crate) struct Lab {
    pub fleet: SimFleet,
    pub ctx: AdminContext,
    pub handle: ClusterHandle,
    pub members: Vec<InstanceAddress>,
}

impl Lab {
    /// Cluster `name` with one member per port, the first one primary.
    pub fn cluster(name: &str, ports: &[u16]) -> Self {
        let fleet = SimFleet::new();
        let members: Vec<InstanceAddress> = ports.iter().map(|p| addr(*p)).collect();
        for member in &members {
            fleet.add_server(member);
        }
        let ctx = fast_context(&fleet);
        let handle = create_cluster(&ctx, &members[0], name, CreateClusterOptions::default())
            .unwrap();
        for member in &members[1..] {
            add_instance(&ctx, &handle, member, AddInstanceOptions::default()).unwrap();
        }
        ctx.output().take();
        Self {
            fleet,
            ctx,
            handle,
            members,
        }
    }

    /// ClusterSet "world" with `primary` as the primary cluster and a
    /// replica cluster "dr" on `replica_ports`.
    pub fn clusterset(primary: &str, ports: &[u16], replica_ports: &[u16]) -> (Self, ClusterSetHandle, Vec<InstanceAddress>) {
        let lab = Self::cluster(primary, ports);
        let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let replicas = lab.replica_cluster(&cs, "dr", replica_ports);
        lab.ctx.output().take();
        (lab, cs, replicas)
    }

    /// Replica cluster `name` with one member per port.
    pub fn replica_cluster(&self, cs: &ClusterSetHandle, name: &str, ports: &[u16]) -> Vec<InstanceAddress> {
        let members: Vec<InstanceAddress> = ports.iter().map(|p| self.spare(*p)).collect();
        let handle = create_replica_cluster(&self.ctx, cs, &members[0], name, CreateReplicaClusterOptions::default())
            .unwrap();
        for member in &members[1..] {
            add_instance(&self.ctx, &handle, member, AddInstanceOptions::default()).unwrap();
        }
        members
    }

    /// Metadata as stored on the first member.
    pub fn metadata(&self) -> TopologyMetadata {
        self.metadata_on(&self.members[0])
    }

    pub fn metadata_on(&self, address: &InstanceAddress) -> TopologyMetadata {
        let document = self.fleet.metadata_document(address).unwrap();
        TopologyMetadata::from_document(&document).unwrap()
    }

    /// A fresh standalone server on the same fleet.
    pub fn spare(&self, port: u16) -> InstanceAddress {
        let address = addr(port);
        self.fleet.add_server(&address);
        address
    }
}
