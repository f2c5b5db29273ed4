//! Source policies of Read-Replicas
//!
//! A policy becomes a [`SourcePlan`]: the source the channel starts from
//! and the weighted failover list the server uses to move on by itself.
//! - `primary`: the whole group, primary weighted above secondaries
//! - `secondary`: the whole group, secondaries weighted above the primary
//! - a list: only the listed members, in list order
//!
//! A list never expands to members outside it, so a Read-Replica whose
//! listed sources are all gone keeps retrying them instead of moving on.

use std::collections::BTreeSet;

use crate::changes::ChangeSet;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{ChannelConfig, FailoverSource, Statement, READ_REPLICA_CHANNEL};
use crate::quorum::ClusterSnapshot;
use crate::topology::{InstanceAddress, ReplicationSources};

/// `(primary, secondary)` weights when following the primary.
pub const PRIMARY_WEIGHTS: (u8, u8) = (80, 60);
/// `(primary, secondary)` weights when following a secondary.
pub const SECONDARY_WEIGHTS: (u8, u8) = (60, 80);
/// Weight of the first entry of an explicit list; each next entry gets one less.
const LIST_TOP_WEIGHT: u8 = 100;

/// Weight of the list entry at `position`, never below 1.
fn list_weight(position: usize) -> u8 {
    u8::try_from(position)
        .map_or(1, |p| LIST_TOP_WEIGHT.saturating_sub(p))
        .max(1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourcePlan {
    pub initial: InstanceAddress,
    pub failover: Vec<FailoverSource>,
}

impl SourcePlan {
    /// The failover list as a channel reports it.
    pub fn source_strings(&self) -> Vec<String> {
        self.failover.iter().map(|s| s.to_string()).collect()
    }
}

fn invalid_source(message: String) -> AdminError {
    AdminError::precondition(AdminErrorKind::InvalidSource, message)
}

/// Check an explicit source list against the live cluster.
///
/// Every entry must be a distinct group member of the cluster, ONLINE now.
pub fn validate_sources(snapshot: &ClusterSnapshot, sources: &ReplicationSources) -> AdminResult<()> {
    let Some(list) = sources.as_list() else {
        return Ok(());
    };
    if list.is_empty() {
        return Err(AdminError::argument(
            "Invalid value for option 'replicationSources': the list cannot be empty.",
        ));
    }
    let mut seen = BTreeSet::new();
    for address in list {
        if !seen.insert(address) {
            return Err(invalid_source(format!(
                "Invalid value for option 'replicationSources': '{}' is listed more than once.",
                address
            )));
        }
        let record = snapshot
            .metadata
            .instance(address)
            .filter(|r| r.cluster_id == snapshot.cluster_id())
            .ok_or_else(|| {
                invalid_source(format!(
                    "The source '{}' is not a member of cluster '{}'.",
                    address,
                    snapshot.name()
                ))
            })?;
        if record.is_read_replica() {
            return Err(invalid_source(format!(
                "The source '{}' is a Read-Replica; only group members can be sources.",
                address
            )));
        }
        match snapshot.member(address) {
            Some(status) if status.is_online() => {}
            Some(status) => {
                return Err(invalid_source(format!(
                    "The source '{}' is {}; a source must be ONLINE.",
                    address,
                    status.state.as_str()
                )))
            }
            None => {
                return Err(invalid_source(format!(
                    "The source '{}' is not a member of cluster '{}'.",
                    address,
                    snapshot.name()
                )))
            }
        }
    }
    Ok(())
}

/// Stable discovery seed of the group: its first registered member.
fn group_seed(snapshot: &ClusterSnapshot) -> Option<InstanceAddress> {
    snapshot.members.first().map(|m| m.address().clone())
}

fn group_source(snapshot: &ClusterSnapshot, seed: InstanceAddress, (primary, secondary): (u8, u8)) -> FailoverSource {
    FailoverSource::Group {
        group_name: snapshot.cluster.group_name,
        seed,
        primary_weight: primary,
        secondary_weight: secondary,
    }
}

/// Where a Read-Replica with `sources` replicates from right now.
pub fn plan_sources(snapshot: &ClusterSnapshot, sources: &ReplicationSources) -> AdminResult<SourcePlan> {
    if let Some(list) = sources.as_list() {
        let initial = list
            .iter()
            .find(|a| snapshot.member(a).is_some_and(|m| m.is_online()))
            .cloned()
            .ok_or_else(|| {
                invalid_source(format!(
                    "None of the configured sources {} is ONLINE.",
                    sources
                ))
            })?;
        let failover = list
            .iter()
            .enumerate()
            .map(|(i, address)| FailoverSource::Instance {
                address: address.clone(),
                weight: list_weight(i),
            })
            .collect();
        return Ok(SourcePlan { initial, failover });
    }

    let primary = snapshot.require_primary("replicationSources")?;
    let seed = group_seed(snapshot).unwrap_or_else(|| primary.clone());
    if sources.is_primary() {
        return Ok(SourcePlan {
            initial: primary,
            failover: vec![group_source(snapshot, seed, PRIMARY_WEIGHTS)],
        });
    }
    // In multi-primary mode every member is a primary; any member other
    // than the writer picked by the view stands in for a secondary.
    let initial = snapshot
        .online_members()
        .into_iter()
        .map(|m| m.address().clone())
        .find(|a| *a != primary)
        .unwrap_or(primary);
    Ok(SourcePlan {
        initial,
        failover: vec![group_source(snapshot, seed, SECONDARY_WEIGHTS)],
    })
}

/// Create and start the Read-Replica channel of `replica`, then fence it.
pub fn start_channel(
    changes: &mut ChangeSet<'_>,
    replica: &InstanceAddress,
    plan: &SourcePlan,
    user: &str,
    password: Option<String>,
) -> AdminResult<()> {
    let channel = READ_REPLICA_CHANNEL.to_string();
    changes.apply_reversible(
        replica,
        Statement::ChangeSource {
            channel: channel.clone(),
            config: ChannelConfig {
                source: Some(plan.initial.clone()),
                user: Some(user.to_string()),
                password,
                auto_failover: Some(true),
                ..ChannelConfig::default()
            },
        },
        Statement::ResetReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(
        replica,
        Statement::SetFailoverSources {
            channel: channel.clone(),
            sources: plan.failover.clone(),
        },
    )?;
    changes.apply_reversible(
        replica,
        Statement::StartReplica {
            channel: channel.clone(),
        },
        Statement::StopReplica { channel },
    )?;
    changes.apply_reversible(
        replica,
        Statement::SetSuperReadOnly { enabled: true },
        Statement::SetSuperReadOnly { enabled: false },
    )?;
    Ok(())
}

/// Point an existing channel at a new plan, keeping its credentials.
pub fn repoint(changes: &mut ChangeSet<'_>, replica: &InstanceAddress, plan: &SourcePlan) -> AdminResult<()> {
    let channel = READ_REPLICA_CHANNEL.to_string();
    changes.apply_reversible(
        replica,
        Statement::StopReplica {
            channel: channel.clone(),
        },
        Statement::StartReplica {
            channel: channel.clone(),
        },
    )?;
    changes.apply(
        replica,
        Statement::ChangeSource {
            channel: channel.clone(),
            config: ChannelConfig {
                source: Some(plan.initial.clone()),
                ..ChannelConfig::default()
            },
        },
    )?;
    changes.apply(
        replica,
        Statement::SetFailoverSources {
            channel: channel.clone(),
            sources: plan.failover.clone(),
        },
    )?;
    changes.apply_reversible(
        replica,
        Statement::StartReplica {
            channel: channel.clone(),
        },
        Statement::StopReplica { channel },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Lab;

    #[test]
    fn test_secondary_policy_starts_on_a_secondary() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        let plan = plan_sources(&snapshot, &ReplicationSources::secondary()).unwrap();
        assert_eq!(plan.initial, lab.members[1]);
        let plan = plan_sources(&snapshot, &ReplicationSources::primary()).unwrap();
        assert_eq!(plan.initial, lab.members[0]);
    }

    #[test]
    fn test_list_weights_follow_order() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        let sources = ReplicationSources::List(vec![lab.members[2].clone(), lab.members[1].clone()]);
        validate_sources(&snapshot, &sources).unwrap();
        let plan = plan_sources(&snapshot, &sources).unwrap();
        assert_eq!(plan.initial, lab.members[2]);
        assert_eq!(
            plan.failover,
            vec![
                FailoverSource::Instance {
                    address: lab.members[2].clone(),
                    weight: 100
                },
                FailoverSource::Instance {
                    address: lab.members[1].clone(),
                    weight: 99
                },
            ]
        );
    }

    #[test]
    fn test_list_weight_bounds() {
        assert_eq!(list_weight(0), 100);
        assert_eq!(list_weight(1), 99);
        assert_eq!(list_weight(99), 1);
        assert_eq!(list_weight(100), 1);
        assert_eq!(list_weight(255), 1);
        assert_eq!(list_weight(256), 1);
        assert_eq!(list_weight(1000), 1);
    }

    #[test]
    fn test_invalid_lists() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let stranger = lab.spare(3340);
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();

        let dup = ReplicationSources::List(vec![lab.members[1].clone(), lab.members[1].clone()]);
        let err = validate_sources(&snapshot, &dup).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidSource);

        let foreign = ReplicationSources::List(vec![stranger]);
        let err = validate_sources(&snapshot, &foreign).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidSource);

        lab.fleet.kill(&lab.members[2]).unwrap();
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        let down = ReplicationSources::List(vec![lab.members[2].clone()]);
        let err = validate_sources(&snapshot, &down).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidSource);
    }
}
