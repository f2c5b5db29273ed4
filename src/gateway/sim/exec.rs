//! Statement execution against one simulated server.

use serde_json::Value;
use uuid::Uuid;

use super::state::{apply_effect, Account, ChannelState, Effect, FleetState, GroupState, LogEntry};
use crate::gateway::{
    codes, AccountSpec, ChannelConfig, GatewayError, GatewayResult, Probe, Row, Rows, Statement,
    APPLIER_CHANNEL,
};
use crate::topology::{InstanceAddress, MemberState};

fn gr_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(codes::ER_GROUP_REPLICATION_CONFIGURATION, message)
}

fn udf_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(codes::ER_GRP_RPL_UDF_ERROR, message)
}

fn no_channel(channel: &str) -> GatewayError {
    GatewayError::new(
        codes::ER_REPLICA_CHANNEL_DOES_NOT_EXIST,
        format!("Replication channel '{}' does not exist.", channel),
    )
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

impl FleetState {
    pub fn execute(&mut self, address: &InstanceAddress, statement: &Statement) -> GatewayResult<Rows> {
        self.refresh();
        let server = self
            .servers
            .get_mut(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        if !server.alive {
            return Err(GatewayError::connection_lost());
        }
        let kind = statement.kind_name();
        if let Some(pos) = server.fail_next.iter().position(|k| k == kind) {
            server.fail_next.remove(pos);
            return Err(GatewayError::new(
                codes::ER_INJECTED_FAILURE,
                format!("Injected failure executing {}", kind),
            ));
        }

        let rows = match statement {
            Statement::Probe(probe) => self.probe(address, *probe)?,
            Statement::SetPersist { variable, value } => {
                server.variables.insert(variable.clone(), value.clone());
                Vec::new()
            }
            Statement::CreateAccount(spec) => {
                self.create_account(address, spec)?;
                Vec::new()
            }
            Statement::DropAccount { user, host } => {
                self.write(
                    address,
                    Effect::DropAccount {
                        user: user.clone(),
                        host: host.clone(),
                    },
                )?;
                Vec::new()
            }
            Statement::SetRecoveryCredentials { user, .. } => {
                server.recovery_user = Some(user.clone());
                Vec::new()
            }
            Statement::StartGroupReplication { bootstrap } => {
                self.start_group_replication(address, *bootstrap)?;
                Vec::new()
            }
            Statement::StopGroupReplication => {
                self.stop_group_replication(address);
                Vec::new()
            }
            Statement::SetPrimary { server_uuid } => {
                self.set_primary(address, server_uuid)?;
                Vec::new()
            }
            Statement::SwitchToSinglePrimary { server_uuid } => {
                self.switch_mode(address, true, server_uuid.as_ref())?;
                Vec::new()
            }
            Statement::SwitchToMultiPrimary => {
                self.switch_mode(address, false, None)?;
                Vec::new()
            }
            Statement::ForceMembers { addresses } => {
                self.force_members(address, addresses)?;
                Vec::new()
            }
            Statement::ChangeSource { channel, config } => {
                change_source(server, channel, config)?;
                Vec::new()
            }
            Statement::StartReplica { channel } => {
                let state = server.channels.get_mut(channel).ok_or_else(|| no_channel(channel))?;
                state.running = true;
                Vec::new()
            }
            Statement::StopReplica { channel } => {
                let state = server.channels.get_mut(channel).ok_or_else(|| no_channel(channel))?;
                state.running = false;
                state.io_state = "OFF".to_string();
                Vec::new()
            }
            Statement::ResetReplica { channel } => {
                server.channels.remove(channel).ok_or_else(|| no_channel(channel))?;
                Vec::new()
            }
            Statement::SetFailoverSources { channel, sources } => {
                let state = server.channels.get_mut(channel).ok_or_else(|| no_channel(channel))?;
                state.failover_sources = sources.clone();
                Vec::new()
            }
            Statement::Clone { donor } => {
                self.clone_from(address, donor)?;
                Vec::new()
            }
            Statement::StoreMetadata { document } => {
                self.write(
                    address,
                    Effect::StoreMetadata {
                        document: document.clone(),
                    },
                )?;
                Vec::new()
            }
            Statement::DropMetadata => {
                self.write(address, Effect::DropMetadata)?;
                Vec::new()
            }
            Statement::SetSuperReadOnly { enabled } => {
                self.set_super_read_only(address, *enabled);
                Vec::new()
            }
        };
        self.refresh();
        Ok(rows)
    }

    /// Log and apply a binlogged transaction originating at `address`.
    pub fn write(&mut self, address: &InstanceAddress, effect: Effect) -> GatewayResult<()> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        if server.super_read_only {
            return Err(GatewayError::read_only());
        }
        let source = match (server.gr_running, server.group) {
            (true, Some(group)) => {
                if server.member_state != MemberState::Online {
                    return Err(GatewayError::read_only());
                }
                if !self.has_quorum(&group) {
                    return Err(GatewayError::new(
                        codes::ER_RUN_HOOK_ERROR,
                        "Error on observer while running replication hook 'before_commit'.",
                    ));
                }
                group
            }
            (true, None) => return Err(GatewayError::read_only()),
            (false, _) => server.uuid,
        };

        let entries = self.log.entry(source).or_default();
        let number = entries.keys().next_back().copied().unwrap_or(0) + 1;
        self.next_seq += 1;
        entries.insert(
            number,
            LogEntry {
                seq: self.next_seq,
                effect: effect.clone(),
            },
        );
        if let Some(server) = self.servers.get_mut(address) {
            apply_effect(server, &effect);
            server.executed.add(source, number);
        }
        Ok(())
    }

    fn create_account(&mut self, address: &InstanceAddress, spec: &AccountSpec) -> GatewayResult<()> {
        let exists = self.servers.get(address).is_some_and(|s| {
            s.accounts.contains(&Account {
                user: spec.user.clone(),
                host: spec.host.clone(),
            })
        });
        if exists {
            return Err(GatewayError::new(
                codes::ER_CANNOT_USER,
                format!(
                    "Operation CREATE USER failed for '{}'@'{}'",
                    spec.user, spec.host
                ),
            ));
        }
        self.write(
            address,
            Effect::CreateAccount {
                user: spec.user.clone(),
                host: spec.host.clone(),
            },
        )
    }

    fn start_group_replication(&mut self, address: &InstanceAddress, bootstrap: bool) -> GatewayResult<()> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        if server.gr_running && server.member_state != MemberState::Error {
            return Err(GatewayError::new(
                codes::ER_GROUP_REPLICATION_RUNNING,
                "The START GROUP_REPLICATION command failed since the group is already running.",
            ));
        }
        let name: Uuid = server
            .variables
            .get("group_replication_group_name")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| gr_error("group_replication_group_name is not set or is invalid."))?;
        let single_primary = server
            .variables
            .get("group_replication_single_primary_mode")
            .map(|v| v != "OFF")
            .unwrap_or(true);

        if bootstrap {
            if !self.live_members(&name).is_empty() {
                return Err(gr_error(
                    "The group is already active; bootstrapping it again would create a second group.",
                ));
            }
            let previous = self.groups.get(&name).map(|g| g.view_seq).unwrap_or(0);
            self.groups.insert(
                name,
                GroupState {
                    members: vec![address.clone()],
                    primary: single_primary.then(|| address.clone()),
                    single_primary,
                    view_seq: previous + 1,
                    fenced: false,
                },
            );
            if let Some(server) = self.servers.get_mut(address) {
                server.group = Some(name);
                server.gr_running = true;
                server.member_state = MemberState::Online;
            }
            return Ok(());
        }

        let recovery_user = server.recovery_user.clone();
        let joiner_executed = server.executed.clone();
        if !self.has_quorum(&name) {
            return Err(gr_error(
                "The server is not able to join the group: no reachable member with quorum.",
            ));
        }
        let group_single_primary = self.groups.get(&name).is_some_and(|g| g.single_primary);
        if group_single_primary != single_primary {
            return Err(gr_error(
                "The member configuration is not compatible with the group configuration \
                 (group_replication_single_primary_mode).",
            ));
        }
        let Some(recovery_user) = recovery_user else {
            return Err(gr_error("Recovery credentials are not configured."));
        };
        let errant = joiner_executed.subtract(&self.group_executed(&name));
        if !errant.is_empty() {
            return Err(gr_error(format!(
                "This member has more executed transactions than those present in the group: {}",
                errant
            )));
        }
        let donors_have_account = self.live_members(&name).iter().any(|m| {
            self.servers
                .get(m)
                .is_some_and(|s| s.has_account_user(&recovery_user))
        });

        if let Some(group) = self.groups.get_mut(&name) {
            group.members.retain(|m| m != address);
            if donors_have_account {
                group.members.push(address.clone());
                group.view_seq += 1;
            }
        }
        if let Some(server) = self.servers.get_mut(address) {
            server.group = Some(name);
            server.gr_running = true;
            server.super_read_only = true;
            server.member_state = if donors_have_account {
                MemberState::Recovering
            } else {
                MemberState::Error
            };
        }
        Ok(())
    }

    fn stop_group_replication(&mut self, address: &InstanceAddress) {
        let group = self.servers.get(address).and_then(|s| s.group);
        if let Some(name) = group {
            if let Some(state) = self.groups.get_mut(&name) {
                let before = state.members.len();
                state.members.retain(|m| m != address);
                if state.members.len() != before {
                    state.view_seq += 1;
                }
                if state.primary.as_ref() == Some(address) {
                    state.primary = None;
                }
            }
        }
        if let Some(server) = self.servers.get_mut(address) {
            server.gr_running = false;
            server.group = None;
            server.member_state = MemberState::Offline;
            server.super_read_only = true;
        }
    }

    /// Group the server is an ONLINE member of, with quorum.
    fn operable_group(&self, address: &InstanceAddress) -> GatewayResult<Uuid> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        let name = server
            .group
            .filter(|g| server.is_online_in(g))
            .ok_or_else(|| udf_error("The member is not ONLINE in a group."))?;
        if !self.has_quorum(&name) {
            return Err(udf_error("The group has no quorum."));
        }
        Ok(name)
    }

    fn member_by_uuid(&self, group: &Uuid, uuid: &Uuid) -> GatewayResult<InstanceAddress> {
        self.live_members(group)
            .into_iter()
            .find(|m| {
                self.servers
                    .get(m)
                    .is_some_and(|s| s.uuid == *uuid && s.member_state == MemberState::Online)
            })
            .ok_or_else(|| udf_error(format!("The server '{}' is not an ONLINE group member.", uuid)))
    }

    fn set_primary(&mut self, address: &InstanceAddress, uuid: &Uuid) -> GatewayResult<()> {
        let name = self.operable_group(address)?;
        let target = self.member_by_uuid(&name, uuid)?;
        if let Some(group) = self.groups.get_mut(&name) {
            if !group.single_primary {
                return Err(udf_error(
                    "The group is running in multi-primary mode; there is no primary to change.",
                ));
            }
            if group.primary.as_ref() != Some(&target) {
                group.primary = Some(target);
                group.view_seq += 1;
            }
        }
        Ok(())
    }

    fn switch_mode(&mut self, address: &InstanceAddress, single: bool, uuid: Option<&Uuid>) -> GatewayResult<()> {
        let name = self.operable_group(address)?;
        let target = match uuid {
            Some(uuid) => Some(self.member_by_uuid(&name, uuid)?),
            None => None,
        };
        let members = match self.groups.get_mut(&name) {
            Some(group) => {
                group.single_primary = single;
                group.primary = if single { target } else { None };
                group.view_seq += 1;
                group.members.clone()
            }
            None => Vec::new(),
        };
        for member in members {
            if let Some(server) = self.servers.get_mut(&member) {
                server.variables.insert(
                    "group_replication_single_primary_mode".to_string(),
                    on_off(single).to_string(),
                );
                server.variables.insert(
                    "group_replication_enforce_update_everywhere_checks".to_string(),
                    on_off(!single).to_string(),
                );
            }
        }
        Ok(())
    }

    fn force_members(&mut self, address: &InstanceAddress, addresses: &[InstanceAddress]) -> GatewayResult<()> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        let name = server
            .group
            .filter(|g| server.is_online_in(g))
            .ok_or_else(|| udf_error("The member is not ONLINE in a group."))?;
        if !addresses.contains(address) {
            return Err(udf_error("The local member must be part of the forced membership."));
        }
        let live = self.live_members(&name);
        if let Some(missing) = addresses.iter().find(|a| !live.contains(a)) {
            return Err(udf_error(format!(
                "Member '{}' is not reachable in the current view and cannot be forced into the group.",
                missing
            )));
        }
        if let Some(group) = self.groups.get_mut(&name) {
            group.members = addresses.to_vec();
            group.view_seq += 1;
        }
        Ok(())
    }

    fn clone_from(&mut self, address: &InstanceAddress, donor: &InstanceAddress) -> GatewayResult<()> {
        let recipient_version = self
            .servers
            .get(address)
            .map(|s| s.version)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        let source = self
            .servers
            .get(donor)
            .filter(|s| s.alive)
            .ok_or_else(|| {
                GatewayError::new(
                    codes::ER_CLONE_DONOR,
                    format!("Clone donor '{}' is not reachable.", donor),
                )
            })?;
        if !source.version.supports_clone() || !recipient_version.supports_clone() {
            return Err(GatewayError::new(
                codes::ER_CLONE_DONOR,
                "The clone plugin is not available on both servers.",
            ));
        }
        let executed = source.executed.clone();
        let accounts = source.accounts.clone();
        let metadata = source.metadata.clone();

        if let Some(server) = self.servers.get_mut(address) {
            server.executed = executed.clone();
            server.purged = executed;
            server.accounts = accounts;
            server.metadata = metadata;
            server.channels.clear();
            server.gr_running = false;
            server.group = None;
            server.member_state = MemberState::Offline;
        }
        Ok(())
    }

    fn set_super_read_only(&mut self, address: &InstanceAddress, enabled: bool) {
        let group = self
            .servers
            .get(address)
            .and_then(|s| s.group.filter(|g| s.is_live_in(g)));
        match group.and_then(|g| self.groups.get_mut(&g)) {
            Some(state) => state.fenced = enabled,
            None => {
                if let Some(server) = self.servers.get_mut(address) {
                    server.super_read_only = enabled;
                }
            }
        }
    }

    fn probe(&self, address: &InstanceAddress, probe: Probe) -> GatewayResult<Rows> {
        let server = self
            .servers
            .get(address)
            .ok_or_else(|| GatewayError::unknown_host(address))?;
        let group = server.group.and_then(|g| self.groups.get(&g).map(|s| (g, s)));

        let rows = match probe {
            Probe::ServerIdentity => vec![Row::new()
                .with("server_uuid", server.uuid.to_string())
                .with("server_id", server.server_id)
                .with("version", server.version.to_string())
                .with("super_read_only", server.super_read_only)],
            Probe::GroupStatus => {
                let in_view = group.is_some_and(|(_, g)| g.members.contains(address));
                let single_primary = match (server.gr_running, group) {
                    (true, Some((_, g))) => g.single_primary,
                    _ => server
                        .variables
                        .get("group_replication_single_primary_mode")
                        .map(|v| v != "OFF")
                        .unwrap_or(true),
                };
                let stack = server
                    .variables
                    .get("group_replication_communication_stack")
                    .cloned()
                    .unwrap_or_else(|| "XCOM".to_string());
                let mut row = Row::new()
                    .with(
                        "group_name",
                        server
                            .variables
                            .get("group_replication_group_name")
                            .map(|v| Value::from(v.clone()))
                            .unwrap_or(Value::Null),
                    )
                    .with("running", server.gr_running)
                    .with(
                        "member_state",
                        if server.gr_running {
                            server.member_state.as_str()
                        } else {
                            "OFFLINE"
                        },
                    )
                    .with("single_primary_mode", single_primary)
                    .with("protocol_version", server.version.protocol_version())
                    .with("communication_stack", stack);
                row = match group {
                    Some((_, g)) if server.gr_running && in_view => row
                        .with("view_id", g.view_id())
                        .with("member_role", g.role_of(address)),
                    _ => row.with("view_id", Value::Null).with("member_role", Value::Null),
                };
                vec![row]
            }
            Probe::GroupMembers => {
                if !server.gr_running {
                    Vec::new()
                } else {
                    match group {
                        Some((name, g)) if g.members.contains(address) => g
                            .members
                            .iter()
                            .map(|m| {
                                let member = self.servers.get(m);
                                let state = match member {
                                    Some(s) if s.is_live_in(&name) => s.member_state.as_str(),
                                    _ => "UNREACHABLE",
                                };
                                Row::new()
                                    .with(
                                        "member_id",
                                        member.map(|s| s.uuid.to_string()).unwrap_or_default(),
                                    )
                                    .with("address", m.to_string())
                                    .with("state", state)
                                    .with("role", g.role_of(m))
                                    .with(
                                        "version",
                                        member.map(|s| s.version.to_string()).unwrap_or_default(),
                                    )
                            })
                            .collect(),
                        _ => vec![Row::new()
                            .with("member_id", server.uuid.to_string())
                            .with("address", address.to_string())
                            .with("state", server.member_state.as_str())
                            .with("role", "SECONDARY")
                            .with("version", server.version.to_string())],
                    }
                }
            }
            Probe::GtidState => vec![Row::new()
                .with("gtid_executed", server.executed.to_string())
                .with("gtid_purged", server.purged.to_string())],
            Probe::Channels => {
                let mut rows: Rows = server
                    .channels
                    .iter()
                    .map(|(name, c)| channel_row(name, c))
                    .collect();
                if server.gr_running {
                    let mut row = Row::new()
                        .with("channel", APPLIER_CHANNEL)
                        .with("source", Value::Null)
                        .with("configured_source", Value::Null)
                        .with("user", Value::Null)
                        .with("io_state", "ON")
                        .with("sql_state", on_off(server.gr_applier_error.is_none()))
                        .with("io_error_number", 0u64)
                        .with("io_error_message", "");
                    row = match server.gr_applier_error {
                        Some(ref e) => row
                            .with("sql_error_number", e.code)
                            .with("sql_error_message", e.message.clone()),
                        None => row.with("sql_error_number", 0u64).with("sql_error_message", ""),
                    };
                    rows.push(row);
                }
                rows
            }
            Probe::MemberStats => {
                let queued = match group {
                    Some((name, _)) if server.gr_running => {
                        self.group_executed(&name).subtract(&server.executed).count()
                    }
                    _ => 0,
                };
                let mut row = Row::new()
                    .with("transactions_checked", server.executed.count())
                    .with("applied", server.executed.count())
                    .with("queued", queued)
                    .with("conflicts_detected", 0u64)
                    .with("rollbacks", 0u64);
                if server.version.reports_applier_worker_threads() {
                    let workers = server
                        .variables
                        .get("replica_parallel_workers")
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(4);
                    row = row.with("applier_worker_threads", workers);
                }
                vec![row]
            }
            Probe::Accounts => server
                .accounts
                .iter()
                .map(|a| Row::new().with("user", a.user.clone()).with("host", a.host.clone()))
                .collect(),
            Probe::Metadata => server
                .metadata
                .iter()
                .map(|doc| Row::new().with("document", doc.clone()))
                .collect(),
        };
        Ok(rows)
    }
}

fn change_source(server: &mut super::state::ServerState, channel: &str, config: &ChannelConfig) -> GatewayResult<()> {
    let state = server
        .channels
        .entry(channel.to_string())
        .or_insert_with(ChannelState::new);
    if state.running && config.source.is_some() {
        return Err(GatewayError::new(
            codes::ER_REPLICA_CHANNEL_MUST_STOP,
            format!(
                "This operation cannot be performed with running replication threads; \
                 run STOP REPLICA FOR CHANNEL '{}' first",
                channel
            ),
        ));
    }
    state.apply(config);
    Ok(())
}

fn channel_row(name: &str, c: &ChannelState) -> Row {
    let sources: Vec<Value> = c
        .failover_sources
        .iter()
        .map(|s| Value::from(s.to_string()))
        .collect();
    let (io_code, io_message) = c
        .io_error
        .as_ref()
        .map(|e| (e.code, e.message.clone()))
        .unwrap_or((0, String::new()));
    let (sql_code, sql_message) = c
        .sql_error
        .as_ref()
        .map(|e| (e.code, e.message.clone()))
        .unwrap_or((0, String::new()));
    let sql_on = c.running && c.sql_error.is_none();
    Row::new()
        .with("channel", name)
        .with(
            "source",
            c.current_source
                .as_ref()
                .map(|s| Value::from(s.to_string()))
                .unwrap_or(Value::Null),
        )
        .with(
            "configured_source",
            c.configured_source
                .as_ref()
                .map(|s| Value::from(s.to_string()))
                .unwrap_or(Value::Null),
        )
        .with(
            "user",
            c.user.as_ref().map(|u| Value::from(u.clone())).unwrap_or(Value::Null),
        )
        .with("io_state", if c.running { c.io_state.as_str() } else { "OFF" })
        .with("sql_state", on_off(sql_on))
        .with("io_error_number", io_code)
        .with("io_error_message", io_message)
        .with("sql_error_number", sql_code)
        .with("sql_error_message", sql_message)
        .with("auto_failover", c.auto_failover)
        .with("connect_retry", c.connect_retry)
        .with("retry_count", c.retry_count)
        .with("heartbeat_period", c.heartbeat_period)
        .with("compression_algorithms", c.compression_algorithms.clone())
        .with("zstd_compression_level", c.zstd_compression_level)
        .with("bind", c.bind.clone())
        .with("network_namespace", c.network_namespace.clone())
        .with("sources", Value::Array(sources))
}
