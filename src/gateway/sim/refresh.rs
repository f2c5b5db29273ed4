//! Background behavior of the fleet: expulsion, primary election, recovery,
//! transaction propagation and asynchronous channel failover.
//!
//! The fleet has no clock. Every gateway call first settles the state to a
//! fixpoint, so anything a real server would do "eventually" has already
//! happened by the time the next probe runs.

use uuid::Uuid;

use super::state::{FleetState, ThreadError};
use crate::gateway::{codes, FailoverSource, GtidSet};
use crate::topology::{InstanceAddress, MemberState};

const MAX_ROUNDS: usize = 32;

impl FleetState {
    pub fn refresh(&mut self) {
        for _ in 0..MAX_ROUNDS {
            let mut changed = self.settle_groups();
            changed |= self.propagate_groups();
            changed |= self.run_channels();
            if !changed {
                break;
            }
        }
    }

    fn settle_groups(&mut self) -> bool {
        let mut changed = false;
        let names: Vec<Uuid> = self.groups.keys().copied().collect();
        for name in names {
            let live = self.live_members(&name);
            let quorum = self.has_quorum(&name);
            let weights: Vec<(InstanceAddress, u32, bool)> = live
                .iter()
                .filter_map(|m| {
                    self.servers
                        .get(m)
                        .map(|s| (m.clone(), s.member_weight(), s.member_state == MemberState::Online))
                })
                .collect();

            let Some(group) = self.groups.get_mut(&name) else {
                continue;
            };

            // A majority expels members it can no longer see.
            if quorum && live.len() < group.members.len() {
                group.members = live.clone();
                group.view_seq += 1;
                changed = true;
            }

            if !group.single_primary {
                if group.primary.take().is_some() {
                    changed = true;
                }
            } else if quorum {
                let current_ok = group
                    .primary
                    .as_ref()
                    .is_some_and(|p| weights.iter().any(|(m, _, online)| m == p && *online));
                if !current_ok {
                    let elected = weights
                        .iter()
                        .filter(|(_, _, online)| *online)
                        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                        .map(|(m, _, _)| m.clone());
                    if elected.is_some() && elected != group.primary {
                        group.primary = elected;
                        group.view_seq += 1;
                        changed = true;
                    }
                }
            }

            let fenced = group.fenced;
            let roles: Vec<(InstanceAddress, bool)> = live
                .iter()
                .map(|m| (m.clone(), group.role_of(m) == "PRIMARY"))
                .collect();
            for (member, is_primary) in roles {
                if let Some(server) = self.servers.get_mut(&member) {
                    let read_only = fenced || !is_primary;
                    if server.super_read_only != read_only {
                        server.super_read_only = read_only;
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    fn propagate_groups(&mut self) -> bool {
        let mut changed = false;
        let names: Vec<Uuid> = self.groups.keys().copied().collect();
        for name in names {
            if !self.has_quorum(&name) {
                continue;
            }
            let executed = self.group_executed(&name);
            for member in self.live_members(&name) {
                let Some(server) = self.servers.get(&member) else {
                    continue;
                };
                if !server.applies_changes() {
                    continue;
                }
                let missing = executed.subtract(&server.executed);
                let recovering = server.member_state == MemberState::Recovering;

                if recovering && !missing.is_empty() && !self.has_donor(&name, &member, &missing) {
                    self.fail_recovery(&name, &member);
                    changed = true;
                    continue;
                }
                if !missing.is_empty() {
                    self.apply_transactions(&member, &missing);
                    changed = true;
                }
                if recovering {
                    if let Some(server) = self.servers.get_mut(&member) {
                        server.member_state = MemberState::Online;
                    }
                    changed = true;
                }
            }
        }
        changed
    }

    /// Whether an ONLINE member can still serve `missing` from its binary logs.
    fn has_donor(&self, group: &Uuid, joiner: &InstanceAddress, missing: &GtidSet) -> bool {
        self.live_members(group).iter().any(|m| {
            m != joiner
                && self.servers.get(m).is_some_and(|s| {
                    s.member_state == MemberState::Online
                        && missing.is_subset_of(&s.executed)
                        && missing.intersect(&s.purged).is_empty()
                })
        })
    }

    fn fail_recovery(&mut self, group: &Uuid, member: &InstanceAddress) {
        if let Some(server) = self.servers.get_mut(member) {
            server.member_state = MemberState::Error;
            server.gr_applier_error = None;
        }
        if let Some(state) = self.groups.get_mut(group) {
            state.members.retain(|m| m != member);
            state.view_seq += 1;
        }
    }

    /// Weighted candidates of a failover source list, in list order.
    fn expand_sources(&self, sources: &[FailoverSource]) -> Vec<(InstanceAddress, u8)> {
        let mut candidates = Vec::new();
        for source in sources {
            match source {
                FailoverSource::Instance { address, weight } => {
                    candidates.push((address.clone(), *weight));
                }
                FailoverSource::Group {
                    group_name,
                    primary_weight,
                    secondary_weight,
                    ..
                } => {
                    let Some(group) = self.groups.get(group_name) else {
                        continue;
                    };
                    for member in &group.members {
                        let weight = if group.role_of(member) == "PRIMARY" {
                            *primary_weight
                        } else {
                            *secondary_weight
                        };
                        candidates.push((member.clone(), weight));
                    }
                }
            }
        }
        candidates
    }

    /// Whether `address` can serve as a replication source right now.
    fn can_serve(&self, address: &InstanceAddress) -> bool {
        let Some(server) = self.servers.get(address) else {
            return false;
        };
        if !server.alive {
            return false;
        }
        match server.group {
            Some(ref group) if server.gr_running => {
                server.is_online_in(group) && self.has_quorum(group)
            }
            _ => true,
        }
    }

    fn pick_source(&self, address: &InstanceAddress, channel: &str) -> Option<InstanceAddress> {
        let state = self.servers.get(address)?.channels.get(channel)?;
        if state.auto_failover && !state.failover_sources.is_empty() {
            let candidates: Vec<(InstanceAddress, u8)> = self
                .expand_sources(&state.failover_sources)
                .into_iter()
                .filter(|(m, _)| m != address && self.can_serve(m))
                .collect();
            let best = candidates.iter().map(|(_, w)| *w).max()?;
            if let Some(ref current) = state.current_source {
                if candidates.iter().any(|(m, w)| m == current && *w == best) {
                    return Some(current.clone());
                }
            }
            return candidates
                .into_iter()
                .find(|(_, w)| *w == best)
                .map(|(m, _)| m);
        }
        state
            .configured_source
            .clone()
            .filter(|source| self.can_serve(source))
    }

    fn run_channels(&mut self) -> bool {
        let mut changed = false;
        let work: Vec<(InstanceAddress, String)> = self
            .servers
            .iter()
            .filter(|(_, s)| s.alive)
            .flat_map(|(addr, s)| {
                s.channels
                    .iter()
                    .filter(|(_, c)| c.running)
                    .map(|(name, _)| (addr.clone(), name.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (address, name) in work {
            let picked = self.pick_source(&address, &name);
            let upstream = picked.as_ref().and_then(|src| {
                self.servers
                    .get(src)
                    .map(|s| (s.executed.clone(), s.purged.clone(), s.accounts.clone()))
            });
            let Some(server) = self.servers.get(&address) else {
                continue;
            };
            let Some(channel) = server.channels.get(&name) else {
                continue;
            };

            let mut io_state = "ON".to_string();
            let mut io_error = None;
            let mut missing = GtidSet::new();
            match (&picked, upstream) {
                (Some(src), Some((executed, purged, accounts))) => {
                    let user = channel.user.clone().unwrap_or_default();
                    if channel.user.is_some() && !accounts.iter().any(|a| a.user == user) {
                        io_state = "CONNECTING".to_string();
                        io_error = Some(ThreadError {
                            code: codes::ER_ACCESS_DENIED,
                            message: format!(
                                "error connecting to source '{}@{}' - Access denied for user '{}'",
                                user, src, user
                            ),
                        });
                    } else {
                        missing = executed.subtract(&server.executed);
                        if !missing.intersect(&purged).is_empty() {
                            io_state = "OFF".to_string();
                            io_error = Some(ThreadError {
                                code: codes::ER_SOURCE_HAS_PURGED_REQUIRED_GTIDS,
                                message: "Cannot replicate because the source purged required binary logs."
                                    .to_string(),
                            });
                            missing = GtidSet::new();
                        }
                    }
                }
                _ => {
                    io_state = "CONNECTING".to_string();
                    let target = channel
                        .current_source
                        .as_ref()
                        .or(channel.configured_source.as_ref())
                        .map(|s| s.to_string())
                        .unwrap_or_default();
                    io_error = Some(ThreadError {
                        code: codes::CR_CONN_REFUSED,
                        message: format!(
                            "error connecting to source '{}' - retry-time: {} retries: {}",
                            target, channel.connect_retry, channel.retry_count
                        ),
                    });
                }
            }

            let applies = server.applies_changes() && channel.sql_error.is_none();
            let new_source = picked.clone().or_else(|| channel.current_source.clone());
            let unchanged = channel.io_state == io_state
                && channel.io_error == io_error
                && channel.current_source == new_source;

            if let Some(channel) = self
                .servers
                .get_mut(&address)
                .and_then(|s| s.channels.get_mut(&name))
            {
                channel.io_state = io_state;
                channel.io_error = io_error;
                channel.current_source = new_source;
            }
            if !unchanged {
                changed = true;
            }
            if applies && !missing.is_empty() {
                self.apply_transactions(&address, &missing);
                changed = true;
            }
        }
        changed
    }
}
