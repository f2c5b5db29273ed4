//! ClusterSet status
//!
//! Each cluster gets a `globalStatus` combining its own availability with
//! the health of the channel it replicates through:
//!
//! - `INVALIDATED`: marked so by a forced failover
//! - `UNKNOWN`: no member could be reached
//! - `NOT_OK`: no quorum, or a replica cluster not replicating
//! - `OK_NOT_CONSISTENT`: a replica cluster with errant transactions
//! - `OK_MISCONFIGURED`: channel settings differ from the configured ones
//! - `OK`

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use super::cluster::{snapshot_status, ClusterStatus};
use super::report::{gtid_text, ClusterHealth, ClusterRole, Tier};
use crate::clusterset::{mismatches, ClusterSetView};
use crate::context::{AdminContext, ClusterSetHandle};
use crate::errors::AdminResult;
use crate::gateway::{GtidSet, CLUSTERSET_CHANNEL};
use crate::options::{OperationOptions, StatusOptions};
use crate::quorum::{channel, gtid_state, ChannelStatus, ClusterSnapshot};
use crate::topology::InstanceAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalStatus {
    Ok,
    OkNotConsistent,
    OkMisconfigured,
    NotOk,
    Invalidated,
    Unknown,
}

/// State of the inbound ClusterSet channel of a replica cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelHealth {
    Ok,
    Connecting,
    Stopped,
    Error,
    Missing,
}

impl ChannelHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Connecting => "CONNECTING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Missing => "MISSING",
        }
    }

    fn of(status: Option<&ChannelStatus>) -> Self {
        match status {
            None => Self::Missing,
            Some(s) if s.has_error() => Self::Error,
            Some(s) if s.io_state == "CONNECTING" => Self::Connecting,
            Some(s) if s.io_state == "ON" && s.sql_state == "ON" => Self::Ok,
            Some(_) => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterSetHealth {
    Healthy,
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetMemberStatus {
    pub cluster_role: ClusterRole,
    pub global_status: GlobalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<InstanceAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_set_replication_status: Option<ChannelHealth>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cluster_errors: Vec<String>,
    /// Channel options whose live value differs from the configured one.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub misconfigured_options: Vec<String>,
    /// Cluster health, from tier 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_set_consistency_status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_set_errant_gtid_set: Option<String>,
    /// Inbound channel as the replica primary reports it, from tier 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_set_replication: Option<ChannelStatus>,
    /// Full cluster status, at tier 3.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<Box<ClusterStatus>>,
}

impl ClusterSetMemberStatus {
    fn bare(cluster_role: ClusterRole, global_status: GlobalStatus) -> Self {
        Self {
            cluster_role,
            global_status,
            primary: None,
            cluster_set_replication_status: None,
            cluster_errors: Vec::new(),
            misconfigured_options: Vec::new(),
            status: None,
            transaction_set_consistency_status: None,
            transaction_set_errant_gtid_set: None,
            cluster_set_replication: None,
            cluster: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetStatus {
    pub domain_name: String,
    pub primary_cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_primary_instance: Option<InstanceAddress>,
    pub status: ClusterSetHealth,
    pub status_text: String,
    pub clusters: BTreeMap<String, ClusterSetMemberStatus>,
}

pub fn clusterset_status(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    options: StatusOptions,
) -> AdminResult<ClusterSetStatus> {
    options.validate()?;
    let tier = Tier::from_extended(options.extended);
    let view = ClusterSetView::load(ctx, handle)?;
    let primary_id = view.primary_id();
    let primary_name = view.primary_cluster()?.name.clone();

    let primary_snapshot = view.snapshot(ctx, &primary_id).ok();
    let writer = primary_snapshot.as_ref().and_then(|s| {
        if s.has_quorum() {
            s.primary()
        } else {
            None
        }
    });
    let writer_executed = writer
        .as_ref()
        .and_then(|w| gtid_state(ctx, w).ok())
        .map(|(executed, _)| executed);

    let mut clusters = BTreeMap::new();
    for cluster in view.clusters() {
        let id = cluster.cluster_id;
        let report = if id == primary_id {
            primary_report(ctx, primary_snapshot.as_ref(), tier)
        } else {
            replica_report(ctx, &view, &id, writer_executed.as_ref(), tier)
        };
        clusters.insert(cluster.name.clone(), report);
    }

    let primary_ok = clusters
        .get(&primary_name)
        .is_some_and(|c| c.global_status == GlobalStatus::Ok);
    let all_ok = clusters.values().all(|c| c.global_status == GlobalStatus::Ok);
    let (status, status_text) = match (primary_ok, all_ok) {
        (true, true) => (ClusterSetHealth::Healthy, "All Clusters available."),
        (true, false) => (
            ClusterSetHealth::Available,
            "Primary Cluster available, there are issues with a Replica cluster.",
        ),
        (false, _) => (
            ClusterSetHealth::Unavailable,
            "Primary Cluster is not available. ClusterSet availability may be restored by \
             restoring the Primary Cluster or failing over to a Replica Cluster.",
        ),
    };

    Ok(ClusterSetStatus {
        domain_name: view.domain_name().to_string(),
        primary_cluster: primary_name,
        global_primary_instance: writer,
        status,
        status_text: status_text.to_string(),
        clusters,
    })
}

fn primary_report(ctx: &AdminContext, snapshot: Option<&ClusterSnapshot>, tier: Tier) -> ClusterSetMemberStatus {
    let Some(snapshot) = snapshot.filter(|s| s.view.is_some()) else {
        return ClusterSetMemberStatus::bare(ClusterRole::Primary, GlobalStatus::Unknown);
    };
    let global = if snapshot.has_quorum() && snapshot.primary().is_some() {
        GlobalStatus::Ok
    } else {
        GlobalStatus::NotOk
    };
    let mut report = ClusterSetMemberStatus::bare(ClusterRole::Primary, global);
    report.primary = snapshot.primary();
    if global == GlobalStatus::NotOk {
        report
            .cluster_errors
            .push("ERROR: The PRIMARY cluster has no quorum and cannot accept writes.".to_string());
    }
    fill_tiers(ctx, &mut report, snapshot, tier);
    report
}

fn replica_report(
    ctx: &AdminContext,
    view: &ClusterSetView,
    cluster_id: &Uuid,
    writer_executed: Option<&GtidSet>,
    tier: Tier,
) -> ClusterSetMemberStatus {
    if view.is_invalidated(cluster_id) {
        let mut report = ClusterSetMemberStatus::bare(ClusterRole::Replica, GlobalStatus::Invalidated);
        report.cluster_errors.push(
            "WARNING: Cluster was invalidated by a forced failover. Use rejoinCluster() to restore it, \
             or removeCluster() to drop it."
                .to_string(),
        );
        return report;
    }
    let snapshot = match view.snapshot(ctx, cluster_id) {
        Ok(s) if s.view.is_some() => s,
        _ => return ClusterSetMemberStatus::bare(ClusterRole::Replica, GlobalStatus::Unknown),
    };
    let mut report = ClusterSetMemberStatus::bare(ClusterRole::Replica, GlobalStatus::Ok);
    let Some(primary) = snapshot.primary().filter(|_| snapshot.has_quorum()) else {
        report.global_status = GlobalStatus::NotOk;
        report
            .cluster_errors
            .push("ERROR: The cluster has no quorum.".to_string());
        fill_tiers(ctx, &mut report, &snapshot, tier);
        return report;
    };
    report.primary = Some(primary.clone());

    let inbound = channel(ctx, &primary, CLUSTERSET_CHANNEL).ok().flatten();
    let health = ChannelHealth::of(inbound.as_ref());
    report.cluster_set_replication_status = Some(health);
    if health != ChannelHealth::Ok {
        report.global_status = GlobalStatus::NotOk;
        report.cluster_errors.push(format!(
            "ERROR: The ClusterSet replication channel is {}. Use rejoinCluster() to restore it.",
            health.as_str()
        ));
    }

    let errant = match (writer_executed, gtid_state(ctx, &primary).ok()) {
        (Some(writer), Some((own, _))) => Some(own.subtract(writer)),
        _ => None,
    };
    if let Some(ref errant) = errant {
        report.transaction_set_consistency_status = Some(if errant.is_empty() {
            "OK"
        } else {
            "INCONSISTENT"
        });
        if !errant.is_empty() {
            if report.global_status == GlobalStatus::Ok {
                report.global_status = GlobalStatus::OkNotConsistent;
            }
            report.cluster_errors.push(format!(
                "WARNING: Errant transactions detected at {}",
                primary
            ));
        }
    }

    if let (Some(member), Some(status)) = (view.member_record(cluster_id), inbound.as_ref()) {
        report.misconfigured_options = mismatches(&member.options, status);
        if !report.misconfigured_options.is_empty() {
            if report.global_status == GlobalStatus::Ok {
                report.global_status = GlobalStatus::OkMisconfigured;
            }
            report.cluster_errors.push(format!(
                "WARNING: The channel settings {} differ from the configured values. Use \
                 rejoinCluster() to apply them.",
                report.misconfigured_options.join(", ")
            ));
        }
    }

    if tier.includes(Tier::GROUP) {
        report.transaction_set_errant_gtid_set = errant.as_ref().and_then(gtid_text);
    }
    if tier.includes(Tier::TRANSACTIONS) {
        report.cluster_set_replication = inbound;
    }
    fill_tiers(ctx, &mut report, &snapshot, tier);
    report
}

fn fill_tiers(ctx: &AdminContext, report: &mut ClusterSetMemberStatus, snapshot: &ClusterSnapshot, tier: Tier) {
    if !tier.includes(Tier::GROUP) {
        return;
    }
    let online = snapshot.members.iter().filter(|m| m.is_online()).count();
    report.status = Some(ClusterHealth::assess(snapshot.has_quorum(), online, snapshot.members.len()).0);
    if tier.includes(Tier::CHANNELS) {
        report.cluster = Some(Box::new(snapshot_status(ctx, snapshot, Tier::BASIC)));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cluster::set_option;
    use crate::clusterset::{force_primary_cluster, rejoin_cluster};
    use crate::context::ClusterHandle;
    use crate::fixtures::Lab;
    use crate::gateway::Statement;
    use crate::options::{ForcePrimaryClusterOptions, RejoinClusterOptions};

    fn extended(level: u64) -> StatusOptions {
        StatusOptions { extended: level }
    }

    #[test]
    fn test_healthy_clusterset() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310, 3320], &[4410]);
        let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
        assert_eq!(report.status, ClusterSetHealth::Healthy);
        assert_eq!(report.primary_cluster, "prod");
        assert_eq!(report.global_primary_instance, Some(lab.members[0].clone()));

        let replica = &report.clusters["dr"];
        assert_eq!(replica.cluster_role, ClusterRole::Replica);
        assert_eq!(replica.global_status, GlobalStatus::Ok);
        assert_eq!(replica.primary, Some(dr[0].clone()));
        assert_eq!(replica.cluster_set_replication_status, Some(ChannelHealth::Ok));
        assert!(replica.misconfigured_options.is_empty());
        assert!(replica.status.is_none());
    }

    #[test]
    fn test_pending_option_is_misconfigured_until_rejoin() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        let handle = ClusterHandle::new("dr", dr[0].clone());
        set_option(&lab.ctx, &handle, "clusterSetReplicationConnectRetry", &json!(12)).unwrap();

        let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
        let replica = &report.clusters["dr"];
        assert_eq!(replica.global_status, GlobalStatus::OkMisconfigured);
        assert_eq!(replica.misconfigured_options, vec!["clusterSetReplicationConnectRetry"]);
        assert_eq!(report.status, ClusterSetHealth::Available);

        rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap();
        let report = clusterset_status(&lab.ctx, &cs, StatusOptions::default()).unwrap();
        assert_eq!(report.clusters["dr"].global_status, GlobalStatus::Ok);
    }

    #[test]
    fn test_stopped_channel_is_not_ok() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        lab.ctx
            .execute(
                &dr[0],
                &Statement::StopReplica {
                    channel: CLUSTERSET_CHANNEL.to_string(),
                },
            )
            .unwrap();
        let report = clusterset_status(&lab.ctx, &cs, extended(2)).unwrap();
        let replica = &report.clusters["dr"];
        assert_eq!(replica.global_status, GlobalStatus::NotOk);
        assert_eq!(replica.cluster_set_replication_status, Some(ChannelHealth::Stopped));
        assert!(replica.cluster_set_replication.is_some());
        assert_eq!(report.status, ClusterSetHealth::Available);
    }

    #[test]
    fn test_errant_transactions_are_reported() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        lab.ctx
            .execute(&dr[0], &Statement::SetSuperReadOnly { enabled: false })
            .unwrap();
        lab.fleet.write_transactions(&dr[0], 2).unwrap();

        let report = clusterset_status(&lab.ctx, &cs, extended(1)).unwrap();
        let replica = &report.clusters["dr"];
        assert_eq!(replica.global_status, GlobalStatus::OkNotConsistent);
        assert_eq!(replica.transaction_set_consistency_status, Some("INCONSISTENT"));
        assert!(replica.transaction_set_errant_gtid_set.is_some());
        assert!(replica.status.is_some());
    }

    #[test]
    fn test_lost_primary_cluster_then_forced_failover() {
        let (lab, _, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        let via_replica = ClusterSetHandle::new(dr[0].clone());
        lab.fleet.kill(&lab.members[0]).unwrap();

        let report = clusterset_status(&lab.ctx, &via_replica, StatusOptions::default()).unwrap();
        assert_eq!(report.status, ClusterSetHealth::Unavailable);
        assert_eq!(report.clusters["prod"].global_status, GlobalStatus::Unknown);

        force_primary_cluster(&lab.ctx, &via_replica, "dr", ForcePrimaryClusterOptions::default()).unwrap();
        let report = clusterset_status(&lab.ctx, &via_replica, StatusOptions::default()).unwrap();
        assert_eq!(report.primary_cluster, "dr");
        assert_eq!(report.clusters["prod"].global_status, GlobalStatus::Invalidated);
        assert_eq!(report.status, ClusterSetHealth::Available);
    }

    #[test]
    fn test_tier_three_embeds_cluster_status() {
        let (lab, cs, _) = Lab::clusterset("prod", &[3310], &[4410]);
        let report = clusterset_status(&lab.ctx, &cs, extended(3)).unwrap();
        let embedded = report.clusters["prod"].cluster.as_ref().unwrap();
        assert_eq!(embedded.cluster_name, "prod");
        assert_eq!(embedded.cluster_role, Some(ClusterRole::Primary));
    }
}
