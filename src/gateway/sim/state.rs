//! Serializable state of the simulated fleet.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{ChannelConfig, FailoverSource, GtidSet, ServerVersion};
use crate::topology::{InstanceAddress, MemberState};

pub(super) const DEFAULT_MEMBER_WEIGHT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(super) struct Account {
    pub user: String,
    pub host: String,
}

/// Replicated effect of a logged transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub(super) enum Effect {
    CreateAccount { user: String, host: String },
    DropAccount { user: String, host: String },
    StoreMetadata { document: String },
    DropMetadata,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct LogEntry {
    pub seq: u64,
    pub effect: Effect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct ThreadError {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ChannelState {
    pub configured_source: Option<InstanceAddress>,
    pub current_source: Option<InstanceAddress>,
    pub user: Option<String>,
    pub auto_failover: bool,
    pub connect_retry: u64,
    pub retry_count: u64,
    pub heartbeat_period: f64,
    pub compression_algorithms: String,
    pub zstd_compression_level: u64,
    pub bind: String,
    pub network_namespace: String,
    pub running: bool,
    #[serde(default)]
    pub failover_sources: Vec<FailoverSource>,
    pub io_state: String,
    #[serde(default)]
    pub io_error: Option<ThreadError>,
    #[serde(default)]
    pub sql_error: Option<ThreadError>,
}

impl ChannelState {
    pub fn new() -> Self {
        let mut channel = Self {
            configured_source: None,
            current_source: None,
            user: None,
            auto_failover: false,
            connect_retry: 0,
            retry_count: 0,
            heartbeat_period: 0.0,
            compression_algorithms: String::new(),
            zstd_compression_level: 0,
            bind: String::new(),
            network_namespace: String::new(),
            running: false,
            failover_sources: Vec::new(),
            io_state: "OFF".to_string(),
            io_error: None,
            sql_error: None,
        };
        channel.apply(&ChannelConfig::server_defaults());
        channel
    }

    /// Apply the `Some` fields of a channel change.
    pub fn apply(&mut self, config: &ChannelConfig) {
        if let Some(ref source) = config.source {
            self.configured_source = Some(source.clone());
            self.current_source = Some(source.clone());
        }
        if let Some(ref user) = config.user {
            self.user = Some(user.clone());
        }
        if let Some(v) = config.auto_failover {
            self.auto_failover = v;
        }
        if let Some(v) = config.connect_retry {
            self.connect_retry = v;
        }
        if let Some(v) = config.retry_count {
            self.retry_count = v;
        }
        if let Some(v) = config.heartbeat_period {
            self.heartbeat_period = v;
        }
        if let Some(ref v) = config.compression_algorithms {
            self.compression_algorithms = v.clone();
        }
        if let Some(v) = config.zstd_compression_level {
            self.zstd_compression_level = v;
        }
        if let Some(ref v) = config.bind {
            self.bind = v.clone();
        }
        if let Some(ref v) = config.network_namespace {
            self.network_namespace = v.clone();
        }
    }
}

fn offline() -> MemberState {
    MemberState::Offline
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ServerState {
    pub uuid: Uuid,
    pub server_id: u32,
    pub version: ServerVersion,
    pub alive: bool,
    #[serde(default)]
    pub access_denied: bool,
    #[serde(default)]
    pub super_read_only: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub executed: GtidSet,
    #[serde(default)]
    pub purged: GtidSet,
    #[serde(default)]
    pub accounts: BTreeSet<Account>,
    #[serde(default)]
    pub metadata: Option<String>,
    /// Group this server last started in.
    #[serde(default)]
    pub group: Option<Uuid>,
    #[serde(default)]
    pub gr_running: bool,
    #[serde(default = "offline")]
    pub member_state: MemberState,
    #[serde(default)]
    pub recovery_user: Option<String>,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelState>,
    #[serde(default)]
    pub apply_paused: bool,
    #[serde(default)]
    pub gr_applier_error: Option<ThreadError>,
    #[serde(default)]
    pub fail_next: Vec<String>,
}

impl ServerState {
    pub fn new(uuid: Uuid, server_id: u32, version: ServerVersion) -> Self {
        Self {
            uuid,
            server_id,
            version,
            alive: true,
            access_denied: false,
            super_read_only: false,
            variables: BTreeMap::new(),
            executed: GtidSet::new(),
            purged: GtidSet::new(),
            accounts: BTreeSet::new(),
            metadata: None,
            group: None,
            gr_running: false,
            member_state: MemberState::Offline,
            recovery_user: None,
            channels: BTreeMap::new(),
            apply_paused: false,
            gr_applier_error: None,
            fail_next: Vec::new(),
        }
    }

    /// Member of `group` right now, from the group's point of view.
    pub fn is_live_in(&self, group: &Uuid) -> bool {
        self.alive
            && self.gr_running
            && self.group.as_ref() == Some(group)
            && self.member_state.counts_for_quorum()
    }

    pub fn is_online_in(&self, group: &Uuid) -> bool {
        self.is_live_in(group) && self.member_state == MemberState::Online
    }

    pub fn member_weight(&self) -> u32 {
        self.variables
            .get("group_replication_member_weight")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MEMBER_WEIGHT)
    }

    pub fn applies_changes(&self) -> bool {
        !self.apply_paused && self.gr_applier_error.is_none()
    }

    pub fn has_account_user(&self, user: &str) -> bool {
        self.accounts.iter().any(|a| a.user == user)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct GroupState {
    pub members: Vec<InstanceAddress>,
    pub primary: Option<InstanceAddress>,
    pub single_primary: bool,
    pub view_seq: u64,
    /// Members stay read-only even when primary.
    #[serde(default)]
    pub fenced: bool,
}

impl GroupState {
    pub fn view_id(&self) -> String {
        format!("17000000000000000:{}", self.view_seq)
    }

    pub fn role_of(&self, address: &InstanceAddress) -> &'static str {
        if !self.single_primary || self.primary.as_ref() == Some(address) {
            "PRIMARY"
        } else {
            "SECONDARY"
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct FleetState {
    pub servers: BTreeMap<InstanceAddress, ServerState>,
    pub groups: BTreeMap<Uuid, GroupState>,
    pub log: BTreeMap<Uuid, BTreeMap<u64, LogEntry>>,
    pub next_seq: u64,
    pub next_server_id: u32,
}

impl FleetState {
    /// Members of `group` that are alive and running with it.
    pub fn live_members(&self, group: &Uuid) -> Vec<InstanceAddress> {
        let Some(state) = self.groups.get(group) else {
            return Vec::new();
        };
        state
            .members
            .iter()
            .filter(|m| self.servers.get(m).is_some_and(|s| s.is_live_in(group)))
            .cloned()
            .collect()
    }

    pub fn has_quorum(&self, group: &Uuid) -> bool {
        let Some(state) = self.groups.get(group) else {
            return false;
        };
        !state.members.is_empty() && self.live_members(group).len() * 2 > state.members.len()
    }

    /// Union of what the ONLINE members of `group` have executed.
    pub fn group_executed(&self, group: &Uuid) -> GtidSet {
        let mut union = GtidSet::new();
        for member in self.live_members(group) {
            if let Some(server) = self.servers.get(&member) {
                if server.member_state == MemberState::Online {
                    union = union.union(&server.executed);
                }
            }
        }
        union
    }

    /// Apply the logged effects of `missing` to a server, oldest first.
    pub fn apply_transactions(&mut self, address: &InstanceAddress, missing: &GtidSet) {
        let mut effects: Vec<(u64, Effect)> = missing
            .iter()
            .filter_map(|(source, number)| {
                self.log
                    .get(&source)
                    .and_then(|entries| entries.get(&number))
                    .map(|entry| (entry.seq, entry.effect.clone()))
            })
            .collect();
        effects.sort_by_key(|(seq, _)| *seq);

        let Some(server) = self.servers.get_mut(address) else {
            return;
        };
        for (_, effect) in effects {
            apply_effect(server, &effect);
        }
        server.executed = server.executed.union(missing);
    }
}

pub(super) fn apply_effect(server: &mut ServerState, effect: &Effect) {
    match effect {
        Effect::CreateAccount { user, host } => {
            server.accounts.insert(Account {
                user: user.clone(),
                host: host.clone(),
            });
        }
        Effect::DropAccount { user, host } => {
            server.accounts.remove(&Account {
                user: user.clone(),
                host: host.clone(),
            });
        }
        Effect::StoreMetadata { document } => server.metadata = Some(document.clone()),
        Effect::DropMetadata => server.metadata = None,
        Effect::Data => {}
    }
}
