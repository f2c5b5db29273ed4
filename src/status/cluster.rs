//! Cluster status
//!
//! Every member known to the metadata is probed once, in parallel, and
//! turned into a [`MemberReport`]. Read-Replicas are reported next to the
//! group members with the state of their channel.

use std::collections::BTreeMap;

use serde::Serialize;

use super::report::{
    ChannelReport, ChannelsBlock, ClusterHealth, ClusterRole, GroupInformation, MemberDetail,
    MemberIdentityBlock, MemberReport, ReadReplicaReport, ReadReplicaState, Tier, Topology,
    TransactionsBlock, UnreachableMember,
};
use super::workers::probe_parallel;
use crate::cluster::auth::member_auth_warning;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::AdminResult;
use crate::gateway::{GtidSet, APPLIER_CHANNEL, READ_REPLICA_CHANNEL};
use crate::metadata::InstanceRecord;
use crate::options::{OperationOptions, StatusOptions};
use crate::quorum::{
    channels, gtid_state, member_stats, server_identity, ChannelStatus, ClusterSnapshot, MemberStats,
    MemberStatus, ServerIdentity,
};
use crate::topology::{InstanceAddress, MemberRole, MemberState, SslMode, TopologyMode};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<InstanceAddress>,
    pub ssl: SslMode,
    pub status: ClusterHealth,
    pub status_text: String,
    pub topology_mode: TopologyMode,
    pub topology: Topology<MemberReport>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub read_replicas: Topology<ReadReplicaReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cluster_errors: Vec<String>,
    #[serde(flatten)]
    pub group: Option<GroupInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_role: Option<ClusterRole>,
    pub default_replica_set: ReplicaSetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_information_source_member: Option<InstanceAddress>,
}

impl ClusterStatus {
    pub fn member(&self, address: &InstanceAddress) -> Option<&MemberReport> {
        self.default_replica_set.topology.get(&address.to_string())
    }

    pub fn read_replica(&self, address: &InstanceAddress) -> Option<&ReadReplicaReport> {
        self.default_replica_set.read_replicas.get(&address.to_string())
    }
}

/// What one probe round learned about a server.
struct Probed {
    identity: Option<ServerIdentity>,
    stats: Option<MemberStats>,
    channels: Vec<ChannelStatus>,
    executed: Option<GtidSet>,
    error: Option<String>,
}

impl Probed {
    fn skipped() -> Self {
        Self {
            identity: None,
            stats: None,
            channels: Vec::new(),
            executed: None,
            error: None,
        }
    }

    fn channel(&self, name: &str) -> Option<&ChannelStatus> {
        self.channels.iter().find(|c| c.channel == name)
    }
}

fn probe(ctx: &AdminContext, address: &InstanceAddress) -> Probed {
    let identity = match server_identity(ctx, address) {
        Ok(identity) => identity,
        Err(e) => {
            return Probed {
                error: Some(e.to_string()),
                ..Probed::skipped()
            }
        }
    };
    Probed {
        identity: Some(identity),
        stats: member_stats(ctx, address).ok(),
        channels: channels(ctx, address).unwrap_or_default(),
        executed: gtid_state(ctx, address).ok().map(|(executed, _)| executed),
        error: None,
    }
}

/// `status()` of the cluster `handle` names.
pub fn status(ctx: &AdminContext, handle: &ClusterHandle, options: StatusOptions) -> AdminResult<ClusterStatus> {
    options.validate()?;
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    Ok(snapshot_status(ctx, &snapshot, Tier::from_extended(options.extended)))
}

pub(crate) fn snapshot_status(ctx: &AdminContext, snapshot: &ClusterSnapshot, tier: Tier) -> ClusterStatus {
    let cluster = &snapshot.cluster;
    let replicas: Vec<&InstanceRecord> = snapshot.read_replicas();

    // Group members the snapshot already failed to reach are not probed again.
    let mut targets: Vec<Option<InstanceAddress>> = snapshot
        .members
        .iter()
        .map(|m| m.reachable.then(|| m.address().clone()))
        .collect();
    targets.extend(replicas.iter().map(|r| Some(r.address.clone())));
    let mut probed = probe_parallel(ctx.settings().status_workers, &targets, |target| match target {
        Some(address) => probe(ctx, address),
        None => Probed::skipped(),
    })
    .into_iter();

    let single_primary = snapshot.topology_mode() == TopologyMode::SinglePrimary;
    let mut topology = Topology::new();
    let mut primary_executed: Option<GtidSet> = None;
    let primary = snapshot.primary();
    for member in &snapshot.members {
        let result = probed.next().unwrap_or_else(Probed::skipped);
        if primary.as_ref() == Some(member.address()) {
            primary_executed = result.executed.clone();
        }
        let report = member_report(snapshot, member, &result, tier, single_primary);
        topology.insert(member.address().to_string(), report);
    }
    let mut read_replicas = Topology::new();
    for record in replicas {
        let result = probed.next().unwrap_or_else(Probed::skipped);
        let report = read_replica_report(record, &result, primary_executed.as_ref(), tier);
        read_replicas.insert(record.address.to_string(), report);
    }

    let online = snapshot.members.iter().filter(|m| m.is_online()).count();
    let (health, status_text) = ClusterHealth::assess(snapshot.has_quorum(), online, snapshot.members.len());
    let group = match (&snapshot.view, tier.includes(Tier::GROUP)) {
        (Some(view), true) => Some(GroupInformation {
            group_name: view.group_name.unwrap_or(cluster.group_name),
            group_view_id: view.view_id.clone(),
            protocol_version: view.protocol_version.clone(),
            communication_stack: view.communication_stack.clone(),
            member_auth_type: cluster.member_auth_type,
            cert_issuer: cluster.cert_issuer.clone(),
        }),
        _ => None,
    };
    let (domain_name, cluster_role) = match snapshot.clusterset() {
        Some(cs) => {
            let role = if cs.primary_cluster == cluster.cluster_id {
                ClusterRole::Primary
            } else {
                ClusterRole::Replica
            };
            (Some(cs.domain_name.clone()), Some(role))
        }
        None => (None, None),
    };

    ClusterStatus {
        cluster_name: cluster.name.clone(),
        domain_name,
        cluster_role,
        default_replica_set: ReplicaSetStatus {
            name: "default".to_string(),
            primary: if single_primary { primary } else { None },
            ssl: cluster.ssl_mode,
            status: health,
            status_text,
            topology_mode: cluster.topology_mode,
            topology,
            read_replicas,
            cluster_errors: cluster_errors(snapshot),
            group,
        },
        group_information_source_member: snapshot.view.as_ref().map(|v| v.observed_from.clone()),
    }
}

/// Disagreements between the live group and the metadata.
fn cluster_errors(snapshot: &ClusterSnapshot) -> Vec<String> {
    let Some(ref view) = snapshot.view else {
        return Vec::new();
    };
    let mut errors: Vec<String> = view
        .members
        .iter()
        .filter(|m| snapshot.member(&m.address).is_none())
        .map(|m| {
            format!(
                "WARNING: Instance '{}' is part of the group but not of the cluster metadata. \
                 Use rescan() to update the metadata.",
                m.address
            )
        })
        .collect();
    if view.topology_mode() != snapshot.cluster.topology_mode {
        errors.push(format!(
            "WARNING: The group runs in {} mode but the metadata records {}. Use rescan() to \
             update the metadata.",
            view.topology_mode().as_str(),
            snapshot.cluster.topology_mode.as_str()
        ));
    }
    errors
}

fn member_errors(
    snapshot: &ClusterSnapshot,
    member: &MemberStatus,
    identity: &ServerIdentity,
    probed: &Probed,
    single_primary: bool,
) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(warning) = member_auth_warning(&snapshot.cluster, &member.record) {
        errors.push(warning);
    }
    if member.state == MemberState::Offline {
        errors.push("NOTE: group_replication is stopped.".to_string());
    }
    if let Some(applier) = probed.channel(APPLIER_CHANNEL).filter(|c| c.has_error()) {
        errors.push(format!(
            "ERROR: The group replication applier stopped with error {}: {}",
            applier.sql_error_number, applier.sql_error_message
        ));
    }
    let secondary = member.is_online() && member.role == Some(MemberRole::Secondary);
    if single_primary && secondary && !identity.super_read_only {
        errors.push("WARNING: Instance is a SECONDARY but super_read_only is OFF.".to_string());
    }
    errors
}

fn member_report(
    snapshot: &ClusterSnapshot,
    member: &MemberStatus,
    probed: &Probed,
    tier: Tier,
    single_primary: bool,
) -> MemberReport {
    let Some(ref identity) = probed.identity else {
        let shell_connect_error = member
            .error
            .as_ref()
            .map(|e| e.to_string())
            .or_else(|| probed.error.clone())
            .unwrap_or_else(|| format!("Could not connect to '{}'.", member.address()));
        return MemberReport::Unreachable(UnreachableMember {
            address: member.address().clone(),
            status: member.state,
            shell_connect_error,
        });
    };

    let mode = match (member.is_online(), identity.super_read_only) {
        (true, false) => "R/W",
        (true, true) => "R/O",
        (false, _) => "n/a",
    };
    let stats = probed.stats.clone().map(|mut stats| {
        if !identity.version.reports_applier_worker_threads() {
            stats.applier_worker_threads = None;
        }
        stats
    });
    let detail = MemberDetail {
        address: member.address().clone(),
        label: member.record.label.clone(),
        member_role: member.role,
        mode,
        status: member.state,
        version: Some(identity.version.to_string()),
        replication_lag: stats.as_ref().filter(|_| member.is_online()).map(|s| s.queued),
        instance_errors: member_errors(snapshot, member, identity, probed, single_primary),
        identity: tier.includes(Tier::GROUP).then(|| MemberIdentityBlock {
            member_id: member.record.server_uuid,
            fence_sys_vars: if identity.super_read_only {
                vec!["super_read_only"]
            } else {
                Vec::new()
            },
            cert_subject: member.record.cert_subject.clone(),
        }),
        transactions: stats
            .filter(|_| tier.includes(Tier::TRANSACTIONS))
            .map(|transactions| TransactionsBlock { transactions }),
        channels: tier.includes(Tier::CHANNELS).then(|| ChannelsBlock {
            channels: probed.channels.iter().map(ChannelReport::from).collect(),
        }),
    };
    MemberReport::Member(Box::new(detail))
}

fn read_replica_report(
    record: &InstanceRecord,
    probed: &Probed,
    cluster_executed: Option<&GtidSet>,
    tier: Tier,
) -> ReadReplicaReport {
    let sources = record
        .read_replica
        .as_ref()
        .map(|r| r.replication_sources.clone())
        .unwrap_or_default();
    let mut report = ReadReplicaReport {
        address: record.address.clone(),
        label: record.label.clone(),
        role: "READ_REPLICA",
        mode: "n/a",
        status: ReadReplicaState::Unreachable,
        replication_sources: sources.clone(),
        current_source: None,
        version: None,
        replication_lag: None,
        instance_errors: Vec::new(),
        shell_connect_error: None,
        channels: None,
    };
    let Some(ref identity) = probed.identity else {
        report.shell_connect_error = probed.error.clone();
        return report;
    };

    let channel = probed.channel(READ_REPLICA_CHANNEL);
    report.status = ReadReplicaState::of_channel(channel);
    report.version = Some(identity.version.to_string());
    if report.status == ReadReplicaState::Online {
        report.mode = "R/O";
    }
    report.current_source = channel.and_then(|c| c.source.clone());
    report.replication_lag = match (cluster_executed, probed.executed.as_ref()) {
        (Some(cluster), Some(own)) => Some(cluster.subtract(own).count()),
        _ => None,
    };

    match channel {
        None => report.instance_errors.push(
            "WARNING: The Read-Replica's replication channel is missing. Use rejoinInstance() to \
             restore it."
                .to_string(),
        ),
        Some(c) if c.has_error() => {
            let last = ChannelReport::from(c).last_error.unwrap_or_default();
            report.instance_errors.push(format!(
                "ERROR: The Read-Replica's replication channel stopped with error {}",
                last
            ));
        }
        Some(_) => {}
    }
    if let Some(list) = sources.as_list() {
        let outside = channel
            .and_then(|c| c.source_address())
            .filter(|current| !list.contains(current));
        if let Some(current) = outside {
            report.instance_errors.push(format!(
                "WARNING: Replicating from '{}', which is not one of the configured sources.",
                current
            ));
        }
        if report.status == ReadReplicaState::Connecting {
            report.instance_errors.push(
                "WARNING: None of the configured sources is reachable; the channel keeps retrying."
                    .to_string(),
            );
        }
    }
    if tier.includes(Tier::CHANNELS) {
        report.channels = Some(ChannelsBlock {
            channels: channel.map(ChannelReport::from).into_iter().collect(),
        });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::create_cluster;
    use crate::fixtures::{addr, fast_context, Lab};
    use crate::gateway::{ServerVersion, SimFleet, SimServerSpec};
    use crate::options::{AddReplicaInstanceOptions, CreateClusterOptions};
    use crate::replica::add_replica_instance;

    fn extended(level: u64) -> StatusOptions {
        StatusOptions { extended: level }
    }

    #[test]
    fn test_healthy_cluster() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let report = status(&lab.ctx, &lab.handle, StatusOptions::default()).unwrap();
        let rs = &report.default_replica_set;
        assert_eq!(rs.status, ClusterHealth::Ok);
        assert_eq!(rs.primary, Some(lab.members[0].clone()));
        assert_eq!(rs.topology.len(), 3);

        let primary = report.member(&lab.members[0]).and_then(MemberReport::detail).unwrap();
        assert_eq!(primary.mode, "R/W");
        assert_eq!(primary.member_role, Some(MemberRole::Primary));
        let secondary = report.member(&lab.members[1]).and_then(MemberReport::detail).unwrap();
        assert_eq!(secondary.mode, "R/O");
        assert!(secondary.instance_errors.is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["defaultReplicaSet"].get("groupName").is_none());
        assert!(json["defaultReplicaSet"]["topology"]["127.0.0.1:3320"].get("transactions").is_none());
    }

    #[test]
    fn test_lost_member_degrades_to_connect_error() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        lab.fleet.kill(&lab.members[2]).unwrap();

        let report = status(&lab.ctx, &lab.handle, StatusOptions::default()).unwrap();
        assert_eq!(report.default_replica_set.status, ClusterHealth::OkNoTolerancePartial);
        match report.member(&lab.members[2]).unwrap() {
            MemberReport::Unreachable(m) => assert!(!m.shell_connect_error.is_empty()),
            other => panic!("expected an unreachable record, got {:?}", other),
        }
    }

    #[test]
    fn test_no_quorum() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        lab.fleet.kill(&lab.members[1]).unwrap();
        lab.fleet.kill(&lab.members[2]).unwrap();
        let report = status(&lab.ctx, &lab.handle, StatusOptions::default()).unwrap();
        assert_eq!(report.default_replica_set.status, ClusterHealth::NoQuorum);
        assert!(!report.default_replica_set.status.is_available());
    }

    #[test]
    fn test_extended_tiers_add_blocks() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let report = status(&lab.ctx, &lab.handle, extended(3)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        let rs = &json["defaultReplicaSet"];
        assert!(rs.get("groupName").is_some());
        assert!(rs.get("GRProtocolVersion").is_some());
        let member = &rs["topology"]["127.0.0.1:3320"];
        assert!(member.get("memberId").is_some());
        assert_eq!(member["fenceSysVars"], serde_json::json!(["super_read_only"]));
        assert!(member["transactions"].get("applierWorkerThreads").is_some());
        assert!(member["channels"].as_array().is_some_and(|c| !c.is_empty()));

        assert!(status(&lab.ctx, &lab.handle, extended(4)).is_err());
    }

    #[test]
    fn test_worker_threads_only_on_newer_servers() {
        let fleet = SimFleet::new();
        let seed = addr(3310);
        fleet.add_server_with(
            &seed,
            SimServerSpec {
                version: ServerVersion::new(8, 0, 20),
                ..SimServerSpec::default()
            },
        );
        let ctx = fast_context(&fleet);
        let handle = create_cluster(&ctx, &seed, "old", CreateClusterOptions::default()).unwrap();
        let report = status(&ctx, &handle, extended(2)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        let member = &json["defaultReplicaSet"]["topology"]["127.0.0.1:3310"];
        assert!(member["transactions"].get("applied").is_some());
        assert!(member["transactions"].get("applierWorkerThreads").is_none());
    }

    #[test]
    fn test_read_replica_follows_primary() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3340);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();
        lab.fleet.write_transactions(&lab.members[0], 3).unwrap();

        let report = status(&lab.ctx, &lab.handle, StatusOptions::default()).unwrap();
        let rr = report.read_replica(&replica).unwrap();
        assert_eq!(rr.status, ReadReplicaState::Online);
        assert_eq!(rr.current_source.as_deref(), Some("127.0.0.1:3310"));
        assert_eq!(rr.replication_lag, Some(0));
        assert!(rr.instance_errors.is_empty());
    }

    #[test]
    fn test_unregistered_group_member_is_flagged() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let mut md = lab.metadata();
        md.remove_instance(&lab.members[1]);
        md.touch();
        lab.ctx
            .execute(
                &lab.members[0],
                &crate::gateway::Statement::StoreMetadata {
                    document: md.to_document().unwrap(),
                },
            )
            .unwrap();
        let report = status(&lab.ctx, &lab.handle, StatusOptions::default()).unwrap();
        assert!(report.default_replica_set.cluster_errors[0].contains("rescan()"));
    }
}
