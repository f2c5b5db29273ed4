//! Shared setup for scenario tests
//!
//! Builds clusters on an in-memory fleet with a fast polling context.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gradmin::cluster::{add_instance, create_cluster};
use gradmin::console::NonInteractiveConsole;
use gradmin::context::{AdminContext, ClusterHandle, EngineSettings};
use gradmin::gateway::SimFleet;
use gradmin::metadata::TopologyMetadata;
use gradmin::options::{AddInstanceOptions, CreateClusterOptions};
use gradmin::topology::InstanceAddress;

pub fn addr(port: u16) -> InstanceAddress {
    InstanceAddress::new("127.0.0.1", port)
}

pub fn context(fleet: &SimFleet) -> AdminContext {
    let settings = EngineSettings {
        poll_interval: Duration::from_millis(1),
        state_wait_attempts: 5,
        ..EngineSettings::default()
    };
    AdminContext::new(Arc::new(fleet.clone()), Arc::new(NonInteractiveConsole), settings)
}

pub struct Lab {
    pub fleet: SimFleet,
    pub ctx: AdminContext,
    pub handle: ClusterHandle,
    pub members: Vec<InstanceAddress>,
}

impl Lab {
    /// Single-primary cluster `name`, one member per port, the first primary.
    pub fn cluster(name: &str, ports: &[u16]) -> Self {
        let fleet = SimFleet::new();
        let members: Vec<InstanceAddress> = ports.iter().map(|p| addr(*p)).collect();
        for member in &members {
            fleet.add_server(member);
        }
        let ctx = context(&fleet);
        let handle = create_cluster(&ctx, &members[0], name, CreateClusterOptions::default()).unwrap();
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

    pub fn spare(&self, port: u16) -> InstanceAddress {
        let address = addr(port);
        self.fleet.add_server(&address);
        address
    }

    pub fn metadata_on(&self, address: &InstanceAddress) -> TopologyMetadata {
        let document = self.fleet.metadata_document(address).unwrap();
        TopologyMetadata::from_document(&document).unwrap()
    }

    pub fn accounts_on(&self, address: &InstanceAddress) -> Vec<String> {
        self.fleet
            .accounts(address)
            .into_iter()
            .map(|(user, _)| user)
            .collect()
    }
}
