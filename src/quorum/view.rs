//! Group views and cluster snapshots
//!
//! A [`GroupView`] is what one ONLINE member reports about its group. A
//! [`ClusterSnapshot`] joins the metadata of a cluster with the best view
//! that can be observed right now, so every member known to the metadata
//! gets exactly one state:
//!
//! - in the view: the state the group reports
//! - outside the view but reachable: its own local state
//! - outside the view and unreachable: `(MISSING)`

use std::str::FromStr;

use uuid::Uuid;

use super::probe::local_group_state;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{GatewayError, Probe, Row, ServerVersion};
use crate::metadata::{self, ClusterRecord, ClusterSetRecord, InstanceRecord, MetadataError, TopologyMetadata};
use crate::observability::{log_event, Event};
use crate::topology::{InstanceAddress, MemberRole, MemberState, TopologyMode};

/// `live` members out of `total` form a majority.
pub fn quorum_holds(live: usize, total: usize) -> bool {
    total > 0 && live * 2 > total
}

/// One member of a live group view.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewMember {
    pub address: InstanceAddress,
    pub server_uuid: Option<Uuid>,
    pub state: MemberState,
    pub role: MemberRole,
    pub version: Option<ServerVersion>,
}

/// Group membership as reported by one member.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    pub observed_from: InstanceAddress,
    pub group_name: Option<Uuid>,
    pub single_primary: bool,
    pub view_id: Option<String>,
    pub protocol_version: String,
    pub communication_stack: String,
    pub members: Vec<ViewMember>,
}

impl GroupView {
    /// Members counting toward quorum.
    pub fn live_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.state.counts_for_quorum())
            .count()
    }

    pub fn has_quorum(&self) -> bool {
        quorum_holds(self.live_count(), self.members.len())
    }

    pub fn member(&self, address: &InstanceAddress) -> Option<&ViewMember> {
        self.members.iter().find(|m| m.address == *address)
    }

    pub fn online(&self) -> Vec<&ViewMember> {
        self.members
            .iter()
            .filter(|m| m.state == MemberState::Online)
            .collect()
    }

    /// Writable member: the primary, or in multi-primary mode the first
    /// ONLINE member.
    pub fn primary(&self) -> Option<&ViewMember> {
        if self.single_primary {
            self.members
                .iter()
                .find(|m| m.role == MemberRole::Primary && m.state == MemberState::Online)
        } else {
            let mut online = self.online();
            online.sort_by(|a, b| a.address.cmp(&b.address));
            online.into_iter().next()
        }
    }

    pub fn topology_mode(&self) -> TopologyMode {
        if self.single_primary {
            TopologyMode::SinglePrimary
        } else {
            TopologyMode::MultiPrimary
        }
    }
}

fn view_member(row: &Row) -> Result<ViewMember, GatewayError> {
    let address = row.str("address")?;
    let address = InstanceAddress::from_str(address)
        .map_err(|e| GatewayError::unexpected_result(e.message))?;
    let server_uuid = row
        .opt_str("member_id")
        .filter(|id| !id.is_empty())
        .and_then(|id| Uuid::from_str(id).ok());
    let state = MemberState::from_str(row.str("state")?)
        .map_err(|e| GatewayError::unexpected_result(e.message))?;
    let role = MemberRole::from_str(row.str("role")?)
        .map_err(|e| GatewayError::unexpected_result(e.message))?;
    let version = row
        .opt_str("version")
        .filter(|v| !v.is_empty())
        .and_then(|v| ServerVersion::from_str(v).ok());
    Ok(ViewMember {
        address,
        server_uuid,
        state,
        role,
        version,
    })
}

/// View of the group `address` is an active member of, if it is one.
pub fn observe(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<Option<GroupView>> {
    let local = local_group_state(ctx, address)?;
    if !local.running || !local.member_state.counts_for_quorum() {
        return Ok(None);
    }
    let rows = ctx.query(address, Probe::GroupMembers)?;
    let members = rows
        .iter()
        .map(view_member)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AdminError::connectivity(address, e))?;
    Ok(Some(GroupView {
        observed_from: address.clone(),
        group_name: local.group_name,
        single_primary: local.single_primary,
        view_id: local.view_id,
        protocol_version: local.protocol_version,
        communication_stack: local.communication_stack,
        members,
    }))
}

/// Best view of group `group_name` reachable through `candidates`.
///
/// A view with quorum wins; otherwise the first minority view found.
pub fn find_view(
    ctx: &AdminContext,
    group_name: &Uuid,
    candidates: &[InstanceAddress],
) -> Option<GroupView> {
    let mut minority = None;
    for candidate in candidates {
        let Ok(Some(view)) = observe(ctx, candidate) else {
            continue;
        };
        if view.group_name.as_ref() != Some(group_name) {
            continue;
        }
        if view.has_quorum() {
            return Some(view);
        }
        if minority.is_none() {
            minority = Some(view);
        }
    }
    minority
}

/// Writable member of a cluster with quorum, from live probes only.
pub fn cluster_primary(
    ctx: &AdminContext,
    metadata: &TopologyMetadata,
    cluster_id: &Uuid,
) -> Option<InstanceAddress> {
    let cluster = metadata.cluster(cluster_id)?;
    let candidates: Vec<InstanceAddress> = metadata
        .members_of(cluster_id)
        .iter()
        .map(|m| m.address.clone())
        .collect();
    let view = find_view(ctx, &cluster.group_name, &candidates)?;
    if !view.has_quorum() {
        return None;
    }
    view.primary().map(|m| m.address.clone())
}

/// Live state of one member known to the metadata.
#[derive(Debug, Clone)]
pub struct MemberStatus {
    pub record: InstanceRecord,
    pub state: MemberState,
    pub role: Option<MemberRole>,
    pub reachable: bool,
    pub version: Option<ServerVersion>,
    /// Why the member could not be reached.
    pub error: Option<AdminError>,
}

impl MemberStatus {
    pub fn address(&self) -> &InstanceAddress {
        &self.record.address
    }

    pub fn is_online(&self) -> bool {
        self.state == MemberState::Online
    }
}

/// Metadata of one cluster joined with its live state.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    pub metadata: TopologyMetadata,
    pub cluster: ClusterRecord,
    pub view: Option<GroupView>,
    /// Group members, in metadata order. Read-Replicas are not included.
    pub members: Vec<MemberStatus>,
}

/// Cluster named by `handle`; an empty name means the seed's own cluster.
fn resolve_cluster<'m>(
    metadata: &'m TopologyMetadata,
    handle: &ClusterHandle,
) -> AdminResult<&'m ClusterRecord> {
    if !handle.name.is_empty() {
        return Ok(metadata.require_cluster(&handle.name)?);
    }
    metadata
        .instance(&handle.seed)
        .and_then(|i| metadata.cluster(&i.cluster_id))
        .ok_or_else(|| {
            AdminError::precondition(
                AdminErrorKind::NotMember,
                format!(
                    "The instance '{}' is not registered in any cluster.",
                    handle.seed
                ),
            )
        })
}

impl ClusterSnapshot {
    /// Load the cluster `handle` names, reading metadata through its seed.
    pub fn load(ctx: &AdminContext, handle: &ClusterHandle) -> AdminResult<Self> {
        let md = metadata::load(ctx, &handle.seed)?;
        let cluster_id = resolve_cluster(&md, handle)?.cluster_id;
        Self::build(ctx, md, &cluster_id, Some(&handle.seed))
    }

    /// Snapshot of another cluster of the same metadata.
    pub fn of_cluster(ctx: &AdminContext, metadata: &TopologyMetadata, cluster_id: &Uuid) -> AdminResult<Self> {
        Self::build(ctx, metadata.clone(), cluster_id, None)
    }

    fn build(
        ctx: &AdminContext,
        mut md: TopologyMetadata,
        cluster_id: &Uuid,
        seed: Option<&InstanceAddress>,
    ) -> AdminResult<Self> {
        let cluster = md
            .cluster(cluster_id)
            .cloned()
            .ok_or_else(|| MetadataError::UnknownCluster(cluster_id.to_string()))?;
        let mut candidates: Vec<InstanceAddress> = Vec::new();
        if let Some(seed) = seed {
            candidates.push(seed.clone());
        }
        for member in md.members_of(cluster_id) {
            if !candidates.contains(&member.address) {
                candidates.push(member.address.clone());
            }
        }
        let view = find_view(ctx, &cluster.group_name, &candidates);

        // The writable member carries the newest metadata of its group.
        if let Some(primary) = view.as_ref().and_then(|v| v.primary()) {
            if Some(&primary.address) != seed {
                if let Ok(Some(fresh)) = metadata::read_from(ctx, &primary.address) {
                    if fresh.generation > md.generation {
                        md = fresh;
                    }
                }
            }
        }
        let cluster = md.cluster(cluster_id).cloned().unwrap_or(cluster);

        let records: Vec<InstanceRecord> = md.members_of(cluster_id).into_iter().cloned().collect();
        let members = records
            .into_iter()
            .map(|record| member_status(ctx, view.as_ref(), record))
            .collect();

        if let Some(ref v) = view {
            if !v.has_quorum() {
                log_event(
                    Event::QuorumLost,
                    &[
                        ("cluster", cluster.name.as_str()),
                        ("observed_from", v.observed_from.to_string().as_str()),
                    ],
                );
            }
        }

        Ok(Self {
            metadata: md,
            cluster,
            view,
            members,
        })
    }

    pub fn cluster_id(&self) -> Uuid {
        self.cluster.cluster_id
    }

    pub fn name(&self) -> &str {
        &self.cluster.name
    }

    pub fn has_quorum(&self) -> bool {
        self.view.as_ref().is_some_and(|v| v.has_quorum())
    }

    /// The live view, provided it has quorum.
    pub fn require_quorum(&self, operation: &str) -> AdminResult<&GroupView> {
        match self.view {
            Some(ref view) if view.has_quorum() => Ok(view),
            _ => Err(AdminError::no_quorum(&self.cluster.name, operation)),
        }
    }

    pub fn primary(&self) -> Option<InstanceAddress> {
        self.view
            .as_ref()
            .filter(|v| v.has_quorum())
            .and_then(|v| v.primary())
            .map(|m| m.address.clone())
    }

    /// Writable member; fails without quorum.
    pub fn require_primary(&self, operation: &str) -> AdminResult<InstanceAddress> {
        let view = self.require_quorum(operation)?;
        view.primary().map(|m| m.address.clone()).ok_or_else(|| {
            AdminError::precondition(
                AdminErrorKind::InvalidState,
                format!(
                    "Unable to find a writable member of cluster '{}' for {}.",
                    self.cluster.name, operation
                ),
            )
        })
    }

    pub fn member(&self, address: &InstanceAddress) -> Option<&MemberStatus> {
        self.members.iter().find(|m| m.record.address == *address)
    }

    pub fn online_members(&self) -> Vec<&MemberStatus> {
        self.members.iter().filter(|m| m.is_online()).collect()
    }

    pub fn read_replicas(&self) -> Vec<&InstanceRecord> {
        self.metadata.read_replicas_of(&self.cluster.cluster_id)
    }

    /// Mode the group runs in; the metadata value when no view is available.
    pub fn topology_mode(&self) -> TopologyMode {
        self.view
            .as_ref()
            .map(|v| v.topology_mode())
            .unwrap_or(self.cluster.topology_mode)
    }

    pub fn clusterset(&self) -> Option<&ClusterSetRecord> {
        self.metadata.clusterset_of(&self.cluster.cluster_id)
    }

    pub fn is_replica_cluster(&self) -> bool {
        self.metadata.is_replica_cluster(&self.cluster.cluster_id)
    }

    /// Instance metadata writes go to: the cluster primary, or the primary of
    /// the ClusterSet's primary cluster for a replica cluster.
    pub fn metadata_target(&self, ctx: &AdminContext, operation: &str) -> AdminResult<InstanceAddress> {
        match self.clusterset() {
            Some(cs) if cs.primary_cluster != self.cluster.cluster_id => {
                cluster_primary(ctx, &self.metadata, &cs.primary_cluster).ok_or_else(|| {
                    AdminError::precondition(
                        AdminErrorKind::InvalidState,
                        format!(
                            "The primary cluster of the ClusterSet is not available; {} is not possible.",
                            operation
                        ),
                    )
                })
            }
            _ => self.require_primary(operation),
        }
    }

    /// Metadata target together with the document it holds.
    pub fn metadata_writer(
        &self,
        ctx: &AdminContext,
        operation: &str,
    ) -> AdminResult<(InstanceAddress, TopologyMetadata)> {
        let target = self.metadata_target(ctx, operation)?;
        let md = metadata::load(ctx, &target)?;
        Ok((target, md))
    }
}

fn member_status(ctx: &AdminContext, view: Option<&GroupView>, record: InstanceRecord) -> MemberStatus {
    if let Some(member) = view.and_then(|v| v.member(&record.address)) {
        if member.state != MemberState::Unreachable {
            return MemberStatus {
                state: member.state,
                role: Some(member.role),
                reachable: true,
                version: member.version,
                error: None,
                record,
            };
        }
        let error = ctx.connect(&record.address).err();
        return MemberStatus {
            state: MemberState::Unreachable,
            role: Some(member.role),
            reachable: error.is_none(),
            version: member.version,
            error,
            record,
        };
    }
    match local_group_state(ctx, &record.address) {
        Ok(local) => MemberStatus {
            state: if local.running {
                local.member_state
            } else {
                MemberState::Offline
            },
            role: None,
            reachable: true,
            version: None,
            error: None,
            record,
        },
        Err(error) => MemberStatus {
            state: MemberState::Missing,
            role: None,
            reachable: false,
            version: None,
            error: Some(error),
            record,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(port: u16, state: MemberState, role: MemberRole) -> ViewMember {
        ViewMember {
            address: InstanceAddress::new("h", port),
            server_uuid: None,
            state,
            role,
            version: None,
        }
    }

    fn view(members: Vec<ViewMember>, single_primary: bool) -> GroupView {
        GroupView {
            observed_from: InstanceAddress::new("h", 1),
            group_name: None,
            single_primary,
            view_id: None,
            protocol_version: "8.0.27".to_string(),
            communication_stack: "MYSQL".to_string(),
            members,
        }
    }

    #[test]
    fn test_quorum_rule() {
        assert!(quorum_holds(2, 3));
        assert!(!quorum_holds(1, 2));
        assert!(!quorum_holds(1, 3));
        assert!(quorum_holds(1, 1));
        assert!(!quorum_holds(0, 0));
    }

    #[test]
    fn test_recovering_counts_toward_quorum() {
        let v = view(
            vec![
                member(1, MemberState::Online, MemberRole::Primary),
                member(2, MemberState::Recovering, MemberRole::Secondary),
                member(3, MemberState::Unreachable, MemberRole::Secondary),
            ],
            true,
        );
        assert!(v.has_quorum());
        assert_eq!(v.primary().unwrap().address.port(), 1);
    }

    #[test]
    fn test_minority_view() {
        let v = view(
            vec![
                member(1, MemberState::Online, MemberRole::Primary),
                member(2, MemberState::Unreachable, MemberRole::Secondary),
                member(3, MemberState::Unreachable, MemberRole::Secondary),
            ],
            true,
        );
        assert!(!v.has_quorum());
    }

    #[test]
    fn test_multi_primary_writer_is_lowest_online_address() {
        let v = view(
            vec![
                member(3, MemberState::Online, MemberRole::Primary),
                member(2, MemberState::Online, MemberRole::Primary),
                member(1, MemberState::Recovering, MemberRole::Primary),
            ],
            false,
        );
        assert_eq!(v.primary().unwrap().address.port(), 2);
        assert_eq!(v.topology_mode(), TopologyMode::MultiPrimary);
    }
}
