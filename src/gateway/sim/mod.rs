//! Simulated fleet
//!
//! An in-memory [`Connector`] modelling a set of servers:
//! - identity, version, persisted variables and accounts per server
//! - GTID executed/purged sets backed by a fleet-wide transaction log
//! - group views with quorum, expulsion and primary election
//! - asynchronous channels with weighted automatic source failover
//! - clone, binary log purge and fault injection
//!
//! The whole state serializes to JSON so the CLI can keep a fleet on disk
//! between invocations.

mod exec;
mod refresh;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use self::state::{Effect, FleetState, ServerState, ThreadError};
use super::{
    Connector, GatewayError, GatewayResult, GtidSet, InstanceGateway, Rows, ServerVersion,
    Statement, APPLIER_CHANNEL,
};
use crate::topology::{InstanceAddress, MemberState};

/// Identity of a server added to the fleet.
#[derive(Debug, Clone)]
pub struct SimServerSpec {
    /// Defaults to the next free id.
    pub server_id: Option<u32>,
    /// Defaults to a random UUID.
    pub server_uuid: Option<Uuid>,
    pub version: ServerVersion,
}

impl Default for SimServerSpec {
    fn default() -> Self {
        Self {
            server_id: None,
            server_uuid: None,
            version: ServerVersion::new(8, 0, 35),
        }
    }
}

/// Shared handle to a simulated fleet.
#[derive(Debug, Clone, Default)]
pub struct SimFleet {
    state: Arc<Mutex<FleetState>>,
}

impl SimFleet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_server<T>(
        &self,
        address: &InstanceAddress,
        f: impl FnOnce(&mut ServerState) -> T,
    ) -> GatewayResult<T> {
        let mut state = self.lock();
        state.refresh();
        let server = state
            .servers
            .get_mut(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        let result = f(server);
        state.refresh();
        Ok(result)
    }

    /// Add a standalone server with default identity.
    pub fn add_server(&self, address: &InstanceAddress) -> Uuid {
        self.add_server_with(address, SimServerSpec::default())
    }

    /// Add a standalone server. Replaces any server at the same address.
    pub fn add_server_with(&self, address: &InstanceAddress, spec: SimServerSpec) -> Uuid {
        let mut state = self.lock();
        let server_id = match spec.server_id {
            Some(id) => id,
            None => {
                state.next_server_id += 1;
                state.next_server_id
            }
        };
        let uuid = spec.server_uuid.unwrap_or_else(Uuid::new_v4);
        let mut server = ServerState::new(uuid, server_id, spec.version);
        server.variables.insert(
            "report_host".to_string(),
            address.host().to_string(),
        );
        state.servers.insert(address.clone(), server);
        uuid
    }

    pub fn addresses(&self) -> Vec<InstanceAddress> {
        self.lock().servers.keys().cloned().collect()
    }

    /// Stop the server process. Group peers notice on their next probe.
    pub fn kill(&self, address: &InstanceAddress) -> GatewayResult<()> {
        self.with_server(address, |s| s.alive = false)
    }

    /// Start the server process again. Group replication does not start on boot.
    pub fn restart(&self, address: &InstanceAddress) -> GatewayResult<()> {
        self.with_server(address, |s| {
            s.alive = true;
            if s.gr_running {
                s.gr_running = false;
                s.group = None;
                s.member_state = MemberState::Offline;
                s.super_read_only = true;
            }
        })
    }

    /// Commit `count` user transactions on `address`.
    pub fn write_transactions(&self, address: &InstanceAddress, count: u64) -> GatewayResult<()> {
        let mut state = self.lock();
        state.refresh();
        for _ in 0..count {
            state.write(address, Effect::Data)?;
        }
        state.refresh();
        Ok(())
    }

    /// Purge every binary log of the server.
    pub fn purge_binary_logs(&self, address: &InstanceAddress) -> GatewayResult<()> {
        self.with_server(address, |s| s.purged = s.executed.clone())
    }

    /// Replace the server's metadata document with raw text.
    pub fn overwrite_metadata(&self, address: &InstanceAddress, document: &str) -> GatewayResult<()> {
        self.with_server(address, |s| s.metadata = Some(document.to_string()))
    }

    /// Reject every new connection with an access-denied error.
    pub fn deny_access(&self, address: &InstanceAddress, denied: bool) -> GatewayResult<()> {
        self.with_server(address, |s| s.access_denied = denied)
    }

    /// Fail the next statement of the given kind (see [`Statement::kind_name`]).
    pub fn fail_next(&self, address: &InstanceAddress, kind: &str) -> GatewayResult<()> {
        self.with_server(address, |s| s.fail_next.push(kind.to_string()))
    }

    /// Set or clear an applier error on a channel. The group applier is
    /// addressed by its channel name.
    pub fn set_applier_error(
        &self,
        address: &InstanceAddress,
        channel: &str,
        message: Option<&str>,
    ) -> GatewayResult<()> {
        let error = message.map(|m| ThreadError {
            code: 1146,
            message: m.to_string(),
        });
        self.with_server(address, |s| {
            if channel == APPLIER_CHANNEL {
                s.gr_applier_error = error;
            } else if let Some(c) = s.channels.get_mut(channel) {
                c.sql_error = error;
            }
        })
    }

    /// Stop applying received transactions until resumed.
    pub fn pause_apply(&self, address: &InstanceAddress, paused: bool) -> GatewayResult<()> {
        self.with_server(address, |s| s.apply_paused = paused)
    }

    /// Accounts present on the server, as `(user, host)`.
    pub fn accounts(&self, address: &InstanceAddress) -> Vec<(String, String)> {
        self.with_server(address, |s| {
            s.accounts
                .iter()
                .map(|a| (a.user.clone(), a.host.clone()))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Source a channel currently replicates from.
    pub fn channel_source(&self, address: &InstanceAddress, channel: &str) -> Option<InstanceAddress> {
        self.with_server(address, |s| {
            s.channels
                .get(channel)
                .and_then(|c| c.current_source.clone())
        })
        .ok()
        .flatten()
    }

    /// Receiver thread state of a channel (`ON`, `OFF`, `CONNECTING`).
    pub fn channel_io_state(&self, address: &InstanceAddress, channel: &str) -> Option<String> {
        self.with_server(address, |s| {
            s.channels.get(channel).map(|c| {
                if c.running {
                    c.io_state.clone()
                } else {
                    "OFF".to_string()
                }
            })
        })
        .ok()
        .flatten()
    }

    pub fn gtid_executed(&self, address: &InstanceAddress) -> Option<GtidSet> {
        self.with_server(address, |s| s.executed.clone()).ok()
    }

    pub fn metadata_document(&self, address: &InstanceAddress) -> Option<String> {
        self.with_server(address, |s| s.metadata.clone()).ok().flatten()
    }

    pub fn is_alive(&self, address: &InstanceAddress) -> bool {
        self.lock().servers.get(address).is_some_and(|s| s.alive)
    }

    /// Whole fleet state as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.lock())
    }

    /// Restore a fleet saved with [`SimFleet::to_json`].
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let state: FleetState = serde_json::from_str(json)?;
        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Connector for SimFleet {
    fn connect(&self, address: &InstanceAddress) -> GatewayResult<Arc<dyn InstanceGateway>> {
        let state = self.lock();
        let server = state
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        if !server.alive {
            return Err(GatewayError::connection_refused(address));
        }
        if server.access_denied {
            return Err(GatewayError::access_denied("root"));
        }
        Ok(Arc::new(SimGateway {
            fleet: self.clone(),
            address: address.clone(),
        }))
    }
}

/// Session with one simulated server.
struct SimGateway {
    fleet: SimFleet,
    address: InstanceAddress,
}

impl InstanceGateway for SimGateway {
    fn address(&self) -> &InstanceAddress {
        &self.address
    }

    fn execute(&self, statement: &Statement) -> GatewayResult<Rows> {
        self.fleet.lock().execute(&self.address, statement)
    }

    fn version(&self) -> GatewayResult<ServerVersion> {
        let state = self.fleet.lock();
        match state.servers.get(&self.address) {
            Some(s) if s.alive => Ok(s.version),
            Some(_) => Err(GatewayError::connection_lost()),
            None => Err(GatewayError::unknown_host(&self.address)),
        }
    }

    fn variable(&self, name: &str) -> GatewayResult<Option<String>> {
        let mut state = self.fleet.lock();
        state.refresh();
        let server = match state.servers.get(&self.address) {
            Some(s) if s.alive => s,
            Some(_) => return Err(GatewayError::connection_lost()),
            None => return Err(GatewayError::unknown_host(&self.address)),
        };
        let value = match name {
            "server_uuid" => Some(server.uuid.to_string()),
            "server_id" => Some(server.server_id.to_string()),
            "version" => Some(server.version.to_string()),
            "super_read_only" => Some(if server.super_read_only { "ON" } else { "OFF" }.to_string()),
            "gtid_executed" => Some(server.executed.to_string()),
            "gtid_purged" => Some(server.purged.to_string()),
            "gtid_mode" => Some("ON".to_string()),
            _ => server.variables.get(name).cloned(),
        };
        Ok(value)
    }

    fn is_reachable(&self) -> bool {
        let state = self.fleet.lock();
        state
            .servers
            .get(&self.address)
            .is_some_and(|s| s.alive && !s.access_denied)
    }
}
