//! The ClusterSet as the freshest reachable metadata describes it.

use uuid::Uuid;

use crate::context::{AdminContext, ClusterSetHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::metadata::{self, ClusterRecord, ClusterSetMemberRecord, ClusterSetRecord, TopologyMetadata};
use crate::quorum::{cluster_primary, ClusterSnapshot};
use crate::topology::InstanceAddress;

#[derive(Debug, Clone)]
pub struct ClusterSetView {
    pub metadata: TopologyMetadata,
    pub clusterset: ClusterSetRecord,
}

fn not_in_clusterset(seed: &InstanceAddress) -> AdminError {
    AdminError::precondition(
        AdminErrorKind::InvalidState,
        format!("The instance '{}' does not belong to a ClusterSet.", seed),
    )
}

impl ClusterSetView {
    /// Read the metadata through the seed, then prefer the newest copy held
    /// by the writable member of any cluster of the set.
    ///
    /// After a forced failover the seed may sit in an invalidated cluster
    /// whose copy still names itself primary.
    pub fn load(ctx: &AdminContext, handle: &ClusterSetHandle) -> AdminResult<Self> {
        let seed_md = metadata::load(ctx, &handle.seed)?;
        let clusterset_id = seed_md
            .instance(&handle.seed)
            .and_then(|i| seed_md.cluster(&i.cluster_id))
            .and_then(|c| c.clusterset_id)
            .ok_or_else(|| not_in_clusterset(&handle.seed))?;

        let cluster_ids: Vec<Uuid> = seed_md
            .clusterset(&clusterset_id)
            .map(|cs| cs.members.iter().map(|m| m.cluster_id).collect())
            .unwrap_or_default();
        let mut best = seed_md;
        for cluster_id in cluster_ids {
            let Some(primary) = cluster_primary(ctx, &best, &cluster_id) else {
                continue;
            };
            if let Ok(Some(md)) = metadata::read_from(ctx, &primary) {
                if md.generation > best.generation {
                    best = md;
                }
            }
        }
        let clusterset = best
            .clusterset(&clusterset_id)
            .cloned()
            .ok_or_else(|| not_in_clusterset(&handle.seed))?;
        Ok(Self {
            metadata: best,
            clusterset,
        })
    }

    pub fn domain_name(&self) -> &str {
        &self.clusterset.domain_name
    }

    pub fn primary_id(&self) -> Uuid {
        self.clusterset.primary_cluster
    }

    pub fn primary_cluster(&self) -> AdminResult<&ClusterRecord> {
        self.metadata
            .cluster(&self.clusterset.primary_cluster)
            .ok_or_else(|| AdminError::internal("The ClusterSet metadata has no primary cluster record."))
    }

    /// Clusters of the set, primary first.
    pub fn clusters(&self) -> Vec<&ClusterRecord> {
        let mut clusters: Vec<&ClusterRecord> = self
            .clusterset
            .members
            .iter()
            .filter_map(|m| self.metadata.cluster(&m.cluster_id))
            .collect();
        clusters.sort_by_key(|c| c.cluster_id != self.clusterset.primary_cluster);
        clusters
    }

    pub fn member_record(&self, cluster_id: &Uuid) -> Option<&ClusterSetMemberRecord> {
        self.clusterset.member(cluster_id)
    }

    /// Cluster of the set called `name`.
    pub fn require_cluster(&self, name: &str) -> AdminResult<&ClusterRecord> {
        self.clusters()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                AdminError::argument(format!(
                    "The cluster '{}' does not belong to the ClusterSet '{}'.",
                    name,
                    self.domain_name()
                ))
            })
    }

    /// Replica cluster called `name`; naming the primary is an error.
    pub fn require_replica(&self, name: &str, operation: &str) -> AdminResult<&ClusterRecord> {
        let cluster = self.require_cluster(name)?;
        if cluster.cluster_id == self.primary_id() {
            return Err(AdminError::precondition(
                AdminErrorKind::InvalidState,
                format!(
                    "The cluster '{}' is the PRIMARY cluster of the ClusterSet; {} is not possible on it.",
                    name, operation
                ),
            ));
        }
        Ok(cluster)
    }

    pub fn is_invalidated(&self, cluster_id: &Uuid) -> bool {
        self.member_record(cluster_id).is_some_and(|m| m.invalidated)
    }

    pub fn snapshot(&self, ctx: &AdminContext, cluster_id: &Uuid) -> AdminResult<ClusterSnapshot> {
        ClusterSnapshot::of_cluster(ctx, &self.metadata, cluster_id)
    }

    /// Writable member of the primary cluster.
    pub fn require_writer(&self, ctx: &AdminContext, operation: &str) -> AdminResult<InstanceAddress> {
        cluster_primary(ctx, &self.metadata, &self.primary_id()).ok_or_else(|| {
            AdminError::precondition(
                AdminErrorKind::InvalidState,
                format!(
                    "The PRIMARY cluster of ClusterSet '{}' is not available; {} is not possible. \
                     Use forcePrimaryCluster to promote a replica cluster.",
                    self.domain_name(),
                    operation
                ),
            )
        })
    }
}
