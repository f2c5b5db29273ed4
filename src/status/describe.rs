//! describe: topology as recorded in the metadata, without probing members.

use std::collections::BTreeMap;

use serde::Serialize;

use super::report::ClusterRole;
use crate::clusterset::ClusterSetView;
use crate::context::{AdminContext, ClusterHandle, ClusterSetHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::metadata::{self, ClusterRecord, InstanceRecord, TopologyMetadata};
use crate::topology::{InstanceAddress, ReplicationSources, TopologyMode};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedInstance {
    pub address: InstanceAddress,
    pub label: String,
    /// `HA` for group members, `READ_REPLICA` otherwise.
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_sources: Option<ReplicationSources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_subject: Option<String>,
}

impl From<&InstanceRecord> for DescribedInstance {
    fn from(record: &InstanceRecord) -> Self {
        let replication_sources = record
            .read_replica
            .as_ref()
            .map(|r| r.replication_sources.clone());
        Self {
            address: record.address.clone(),
            label: record.label.clone(),
            role: if replication_sources.is_some() {
                "READ_REPLICA"
            } else {
                "HA"
            },
            replication_sources,
            cert_subject: record.cert_subject.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedReplicaSet {
    pub name: String,
    pub topology_mode: TopologyMode,
    pub topology: Vec<DescribedInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDescription {
    pub cluster_name: String,
    pub default_replica_set: DescribedReplicaSet,
}

fn describe_record(md: &TopologyMetadata, cluster: &ClusterRecord) -> ClusterDescription {
    // Group members first, then Read-Replicas, each in metadata order.
    let mut topology: Vec<DescribedInstance> = md
        .members_of(&cluster.cluster_id)
        .into_iter()
        .map(DescribedInstance::from)
        .collect();
    topology.extend(
        md.read_replicas_of(&cluster.cluster_id)
            .into_iter()
            .map(DescribedInstance::from),
    );
    ClusterDescription {
        cluster_name: cluster.name.clone(),
        default_replica_set: DescribedReplicaSet {
            name: "default".to_string(),
            topology_mode: cluster.topology_mode,
            topology,
        },
    }
}

pub fn describe(ctx: &AdminContext, handle: &ClusterHandle) -> AdminResult<ClusterDescription> {
    let md = metadata::load(ctx, &handle.seed)?;
    let cluster = if handle.name.is_empty() {
        md.instance(&handle.seed)
            .and_then(|i| md.cluster(&i.cluster_id))
            .ok_or_else(|| {
                AdminError::precondition(
                    AdminErrorKind::NotMember,
                    format!("The instance '{}' is not registered in any cluster.", handle.seed),
                )
            })?
    } else {
        md.require_cluster(&handle.name)?
    };
    Ok(describe_record(&md, cluster))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedCluster {
    pub cluster_role: ClusterRole,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub invalidated: bool,
    pub topology: Vec<DescribedInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetDescription {
    pub domain_name: String,
    pub primary_cluster: String,
    pub clusters: BTreeMap<String, DescribedCluster>,
}

pub fn describe_clusterset(ctx: &AdminContext, handle: &ClusterSetHandle) -> AdminResult<ClusterSetDescription> {
    let view = ClusterSetView::load(ctx, handle)?;
    let primary_id = view.primary_id();
    let clusters = view
        .clusters()
        .into_iter()
        .map(|cluster| {
            let described = DescribedCluster {
                cluster_role: if cluster.cluster_id == primary_id {
                    ClusterRole::Primary
                } else {
                    ClusterRole::Replica
                },
                invalidated: view.is_invalidated(&cluster.cluster_id),
                topology: describe_record(&view.metadata, cluster).default_replica_set.topology,
            };
            (cluster.name.clone(), described)
        })
        .collect();
    Ok(ClusterSetDescription {
        domain_name: view.domain_name().to_string(),
        primary_cluster: view.primary_cluster()?.name.clone(),
        clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::Lab;
    use crate::options::AddReplicaInstanceOptions;
    use crate::replica::add_replica_instance;

    #[test]
    fn test_describe_does_not_probe_members() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let replica = lab.spare(3340);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();
        lab.fleet.kill(&lab.members[1]).unwrap();
        lab.fleet.kill(&lab.members[2]).unwrap();

        let description = describe(&lab.ctx, &lab.handle).unwrap();
        let topology = &description.default_replica_set.topology;
        assert_eq!(topology.len(), 4);
        assert_eq!(topology[3].role, "READ_REPLICA");
        assert_eq!(topology[3].replication_sources, Some(ReplicationSources::primary()));
        assert_eq!(topology[0].role, "HA");
    }

    #[test]
    fn test_describe_by_seed() {
        let lab = Lab::cluster("prod", &[3310]);
        let by_seed = describe(&lab.ctx, &ClusterHandle::new("", lab.members[0].clone())).unwrap();
        assert_eq!(by_seed.cluster_name, "prod");
    }

    #[test]
    fn test_describe_clusterset() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410, 4420]);
        let description = describe_clusterset(&lab.ctx, &cs).unwrap();
        assert_eq!(description.domain_name, "world");
        assert_eq!(description.primary_cluster, "prod");
        let replica = &description.clusters["dr"];
        assert_eq!(replica.cluster_role, ClusterRole::Replica);
        assert_eq!(replica.topology.len(), dr.len());
    }
}
