//! Topology metadata document
//!
//! The whole topology (clusters, members, Read-Replicas and ClusterSet
//! relationships) is one versioned JSON document stored inside the
//! replicated group, so every member carries the same copy and the record
//! survives failover.
//!
//! Server UUID and server ID are recorded for every instance so uniqueness
//! can be enforced against members that are currently unreachable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::{MetadataError, MetadataResult};
use crate::topology::{InstanceAddress, MemberAuthType, ReplicationSources, SslMode, TopologyMode};

/// Schema version written by this crate.
pub const SCHEMA_VERSION: &str = "2.2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyMetadata {
    pub schema_version: String,
    /// Incremented on every write.
    pub generation: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub clusters: Vec<ClusterRecord>,
    #[serde(default)]
    pub instances: Vec<InstanceRecord>,
    #[serde(default)]
    pub clustersets: Vec<ClusterSetRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub cluster_id: Uuid,
    pub name: String,
    pub group_name: Uuid,
    pub topology_mode: TopologyMode,
    pub ssl_mode: SslMode,
    pub member_auth_type: MemberAuthType,
    #[serde(default)]
    pub cert_issuer: Option<String>,
    #[serde(default)]
    pub disable_clone: bool,
    #[serde(default)]
    pub clusterset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// Free-form attributes (`adopted`, `communicationStack`, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReplicaRecord {
    pub replication_sources: ReplicationSources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub cluster_id: Uuid,
    pub address: InstanceAddress,
    pub server_uuid: Uuid,
    pub server_id: u32,
    pub label: String,
    #[serde(default)]
    pub cert_subject: Option<String>,
    /// Replication account created for this instance.
    #[serde(default)]
    pub replication_account: Option<String>,
    /// Present when the instance is a Read-Replica.
    #[serde(default)]
    pub read_replica: Option<ReadReplicaRecord>,
    pub joined_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn is_read_replica(&self) -> bool {
        self.read_replica.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetMemberRecord {
    pub cluster_id: Uuid,
    #[serde(default)]
    pub invalidated: bool,
    /// Configured channel options; an explicit `null` is kept.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    /// Options as last applied to the live channel.
    #[serde(default)]
    pub applied_options: BTreeMap<String, Value>,
    #[serde(default)]
    pub replication_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSetRecord {
    pub clusterset_id: Uuid,
    pub domain_name: String,
    pub primary_cluster: Uuid,
    /// Primary first, then replicas in the order they were added.
    pub members: Vec<ClusterSetMemberRecord>,
}

impl ClusterSetRecord {
    pub fn member(&self, cluster_id: &Uuid) -> Option<&ClusterSetMemberRecord> {
        self.members.iter().find(|m| m.cluster_id == *cluster_id)
    }

    pub fn member_mut(&mut self, cluster_id: &Uuid) -> Option<&mut ClusterSetMemberRecord> {
        self.members.iter_mut().find(|m| m.cluster_id == *cluster_id)
    }

    pub fn replica_ids(&self) -> Vec<Uuid> {
        self.members
            .iter()
            .map(|m| m.cluster_id)
            .filter(|id| *id != self.primary_cluster)
            .collect()
    }
}

impl TopologyMetadata {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            generation: 0,
            updated_at: Utc::now(),
            clusters: Vec::new(),
            instances: Vec::new(),
            clustersets: Vec::new(),
        }
    }

    /// Parse and check a stored document.
    pub fn from_document(document: &str) -> MetadataResult<Self> {
        let metadata: TopologyMetadata = serde_json::from_str(document)?;
        let major = |v: &str| v.split('.').next().map(str::to_string);
        if major(&metadata.schema_version) != major(SCHEMA_VERSION) {
            return Err(MetadataError::UnsupportedVersion {
                found: metadata.schema_version,
                expected: SCHEMA_VERSION.to_string(),
            });
        }
        Ok(metadata)
    }

    pub fn to_document(&self) -> MetadataResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn cluster(&self, id: &Uuid) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.cluster_id == *id)
    }

    pub fn cluster_mut(&mut self, id: &Uuid) -> Option<&mut ClusterRecord> {
        self.clusters.iter_mut().find(|c| c.cluster_id == *id)
    }

    pub fn cluster_by_name(&self, name: &str) -> Option<&ClusterRecord> {
        self.clusters.iter().find(|c| c.name == name)
    }

    /// Cluster a name refers to, as a metadata error when unknown.
    pub fn require_cluster(&self, name: &str) -> MetadataResult<&ClusterRecord> {
        self.cluster_by_name(name)
            .ok_or_else(|| MetadataError::UnknownCluster(name.to_string()))
    }

    pub fn instance(&self, address: &InstanceAddress) -> Option<&InstanceRecord> {
        self.instances.iter().find(|i| i.address == *address)
    }

    pub fn instance_mut(&mut self, address: &InstanceAddress) -> Option<&mut InstanceRecord> {
        self.instances.iter_mut().find(|i| i.address == *address)
    }

    pub fn remove_instance(&mut self, address: &InstanceAddress) -> Option<InstanceRecord> {
        let pos = self.instances.iter().position(|i| i.address == *address)?;
        Some(self.instances.remove(pos))
    }

    /// Group members of a cluster (Read-Replicas excluded).
    pub fn members_of(&self, cluster_id: &Uuid) -> Vec<&InstanceRecord> {
        self.instances
            .iter()
            .filter(|i| i.cluster_id == *cluster_id && !i.is_read_replica())
            .collect()
    }

    pub fn read_replicas_of(&self, cluster_id: &Uuid) -> Vec<&InstanceRecord> {
        self.instances
            .iter()
            .filter(|i| i.cluster_id == *cluster_id && i.is_read_replica())
            .collect()
    }

    pub fn clusterset(&self, id: &Uuid) -> Option<&ClusterSetRecord> {
        self.clustersets.iter().find(|cs| cs.clusterset_id == *id)
    }

    pub fn clusterset_mut(&mut self, id: &Uuid) -> Option<&mut ClusterSetRecord> {
        self.clustersets.iter_mut().find(|cs| cs.clusterset_id == *id)
    }

    /// ClusterSet the cluster belongs to.
    pub fn clusterset_of(&self, cluster_id: &Uuid) -> Option<&ClusterSetRecord> {
        let id = self.cluster(cluster_id)?.clusterset_id?;
        self.clusterset(&id)
    }

    /// Whether the cluster is a replica cluster of a ClusterSet.
    pub fn is_replica_cluster(&self, cluster_id: &Uuid) -> bool {
        self.clusterset_of(cluster_id)
            .is_some_and(|cs| cs.primary_cluster != *cluster_id)
    }

    /// Record a write: bump the generation and the timestamp.
    pub fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}

impl Default for TopologyMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TopologyMetadata {
        let mut md = TopologyMetadata::new();
        let cluster_id = Uuid::new_v4();
        md.clusters.push(ClusterRecord {
            cluster_id,
            name: "prod".to_string(),
            group_name: Uuid::new_v4(),
            topology_mode: TopologyMode::SinglePrimary,
            ssl_mode: SslMode::Required,
            member_auth_type: MemberAuthType::Password,
            cert_issuer: None,
            disable_clone: false,
            clusterset_id: None,
            created_at: Utc::now(),
            attributes: BTreeMap::new(),
        });
        for (port, rr) in [(3310u16, false), (3320, true)] {
            md.instances.push(InstanceRecord {
                cluster_id,
                address: InstanceAddress::new("h", port),
                server_uuid: Uuid::new_v4(),
                server_id: u32::from(port),
                label: format!("h:{}", port),
                cert_subject: None,
                replication_account: None,
                read_replica: rr.then(|| ReadReplicaRecord {
                    replication_sources: ReplicationSources::secondary(),
                }),
                joined_at: Utc::now(),
            });
        }
        md
    }

    #[test]
    fn test_document_round_trip_keeps_sources() {
        let md = sample();
        let parsed = TopologyMetadata::from_document(&md.to_document().unwrap()).unwrap();
        assert_eq!(parsed, md);
        let id = md.clusters[0].cluster_id;
        assert_eq!(parsed.members_of(&id).len(), 1);
        assert_eq!(parsed.read_replicas_of(&id).len(), 1);
        assert!(parsed.read_replicas_of(&id)[0]
            .read_replica
            .as_ref()
            .unwrap()
            .replication_sources
            .is_secondary());
    }

    #[test]
    fn test_unsupported_schema_version() {
        let mut md = sample();
        md.schema_version = "1.0.1".to_string();
        let err = TopologyMetadata::from_document(&md.to_document().unwrap()).unwrap_err();
        assert!(matches!(err, MetadataError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_explicit_null_option_survives() {
        let mut member = ClusterSetMemberRecord {
            cluster_id: Uuid::new_v4(),
            invalidated: false,
            options: BTreeMap::new(),
            applied_options: BTreeMap::new(),
            replication_account: None,
        };
        member.options.insert("clusterSetReplicationBind".to_string(), Value::Null);
        let json = serde_json::to_string(&member).unwrap();
        let back: ClusterSetMemberRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.options.get("clusterSetReplicationBind"), Some(&Value::Null));
    }
}
