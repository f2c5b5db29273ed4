//! setPrimaryCluster and forcePrimaryCluster

use std::collections::BTreeMap;

use uuid::Uuid;

use super::channel::{
    drop_inbound_channel, fence, refresh_channel_account, repoint_inbound_channel, start_inbound_channel, unfence,
    without_nulls, InboundSource,
};
use super::view::ClusterSetView;
use crate::changes::{run_reverting, ChangeSet};
use crate::cluster::accounts::clusterset_account;
use crate::context::{AdminContext, ClusterSetHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::CLUSTERSET_CHANNEL;
use crate::metadata::{self, ClusterRecord, TopologyMetadata};
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::{timeout_from_secs, ForcePrimaryClusterOptions, SetPrimaryClusterOptions};
use crate::quorum::{channel, cluster_primary, gtid_state, server_identity, sync_with};
use crate::topology::InstanceAddress;

/// A replica cluster other than the one being promoted.
struct OtherReplica {
    cluster: ClusterRecord,
    primary: Option<InstanceAddress>,
    invalidate: bool,
}

/// Sort the remaining replica clusters into reachable ones and ones listed
/// for invalidation. An unreachable replica nobody listed is an error.
fn other_replicas(
    ctx: &AdminContext,
    view: &ClusterSetView,
    promoted: &Uuid,
    invalidate: &[String],
    operation: &str,
) -> AdminResult<Vec<OtherReplica>> {
    for name in invalidate {
        let cluster = view.require_replica(name, operation)?;
        if cluster.cluster_id == *promoted {
            return Err(AdminError::argument(format!(
                "The cluster '{}' is the one being promoted and cannot be invalidated.",
                name
            )));
        }
    }

    let mut others = Vec::new();
    for id in view.clusterset.replica_ids() {
        if id == *promoted || view.is_invalidated(&id) {
            continue;
        }
        let Some(cluster) = view.metadata.cluster(&id) else {
            continue;
        };
        let listed = invalidate.iter().any(|n| *n == cluster.name);
        let primary = if listed { None } else { cluster_primary(ctx, &view.metadata, &id) };
        if primary.is_none() && !listed {
            return Err(AdminError::precondition(
                AdminErrorKind::InvalidState,
                format!(
                    "The replica cluster '{}' is not available. Add it to the \
                     'invalidateReplicaClusters' option to continue without it.",
                    cluster.name
                ),
            ));
        }
        others.push(OtherReplica {
            cluster: cluster.clone(),
            primary,
            invalidate: listed,
        });
    }
    Ok(others)
}

fn channel_user(view: &ClusterSetView, ctx: &AdminContext, cluster_id: &Uuid, primary: &InstanceAddress) -> AdminResult<String> {
    if let Some(user) = view.member_record(cluster_id).and_then(|m| m.replication_account.clone()) {
        return Ok(user);
    }
    Ok(clusterset_account(server_identity(ctx, primary)?.server_id))
}

/// Repoint every reachable replica at the new primary cluster.
fn repoint_others(
    changes: &mut ChangeSet<'_>,
    view: &ClusterSetView,
    others: &[OtherReplica],
    source: &InboundSource,
) -> AdminResult<()> {
    let ctx = changes.ctx();
    for other in others {
        let Some(ref primary) = other.primary else {
            continue;
        };
        let user = channel_user(view, ctx, &other.cluster.cluster_id, primary)?;
        let subject = view.metadata.instance(primary).and_then(|i| i.cert_subject.clone());
        let account = refresh_channel_account(changes, &source.primary, &other.cluster, &user, subject.as_deref())?;
        if channel(ctx, primary, CLUSTERSET_CHANNEL)?.is_some() {
            repoint_inbound_channel(changes, primary, source, &account)?;
        } else {
            let options = view
                .member_record(&other.cluster.cluster_id)
                .map(|m| m.applied_options.clone())
                .unwrap_or_default();
            start_inbound_channel(changes, primary, source, &account, &options)?;
        }
        ctx.output().info(format!(
            "The cluster '{}' now replicates from '{}'.",
            other.cluster.name, source.primary
        ));
    }
    Ok(())
}

/// Metadata with `promoted` as primary cluster and the listed replicas
/// invalidated.
fn promote_in_metadata(
    md: &mut TopologyMetadata,
    clusterset_id: &Uuid,
    promoted: &Uuid,
    others: &[OtherReplica],
) -> AdminResult<()> {
    let cs = md
        .clusterset_mut(clusterset_id)
        .ok_or_else(|| AdminError::internal("The ClusterSet record disappeared from the metadata."))?;
    cs.primary_cluster = *promoted;
    for member in cs.members.iter_mut() {
        if member.cluster_id == *promoted {
            member.options = without_nulls(&member.options);
            member.applied_options = BTreeMap::new();
        } else if others.iter().any(|o| o.invalidate && o.cluster.cluster_id == member.cluster_id) {
            member.invalidated = true;
        }
    }
    Ok(())
}

fn inbound_of(cluster: &ClusterRecord, primary: &InstanceAddress, md: &TopologyMetadata) -> InboundSource {
    let seed = md
        .members_of(&cluster.cluster_id)
        .first()
        .map(|m| m.address.clone())
        .unwrap_or_else(|| primary.clone());
    InboundSource {
        group_name: cluster.group_name,
        primary: primary.clone(),
        seed,
    }
}

/// Planned switchover: promote replica cluster `name` while the current
/// primary cluster is available.
pub fn set_primary_cluster(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: SetPrimaryClusterOptions,
) -> AdminResult<()> {
    let scope = ObservationScope::with_fields("SET_PRIMARY_CLUSTER", &[("cluster", name)]);
    let result = switchover(ctx, handle, name, &options);
    scope.finish(&result);
    result
}

fn switchover(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: &SetPrimaryClusterOptions,
) -> AdminResult<()> {
    let view = ClusterSetView::load(ctx, handle)?;
    let target = view.require_replica(name, "setPrimaryCluster")?.clone();
    if view.is_invalidated(&target.cluster_id) {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "The cluster '{}' is INVALIDATED; run rejoinCluster on it before promoting it.",
                name
            ),
        ));
    }
    let demoted = view.primary_cluster()?.clone();
    let old_primary = view.require_writer(ctx, "setPrimaryCluster")?;
    let new_primary = view.snapshot(ctx, &target.cluster_id)?.require_primary("setPrimaryCluster")?;
    let others = other_replicas(
        ctx,
        &view,
        &target.cluster_id,
        &options.invalidate_replica_clusters,
        "setPrimaryCluster",
    )?;

    let (target_executed, _) = gtid_state(ctx, &new_primary)?;
    let (primary_executed, _) = gtid_state(ctx, &old_primary)?;
    let errant = target_executed.subtract(&primary_executed);
    if !errant.is_empty() {
        return Err(AdminError::precondition(
            AdminErrorKind::ErrantTransactions,
            format!(
                "The cluster '{}' has transactions the PRIMARY cluster does not have: {}.",
                name, errant
            ),
        ));
    }

    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let demoted_user = channel_user(&view, ctx, &demoted.cluster_id, &old_primary)?;
    let demoted_options = view
        .member_record(&demoted.cluster_id)
        .map(|m| m.options.clone())
        .unwrap_or_default();
    let new_source = inbound_of(&target, &new_primary, &view.metadata);
    let clusterset_id = view.clusterset.clusterset_id;
    let mut md = view.metadata.clone();

    let output = ctx.output();
    output.info(format!(
        "Switching the PRIMARY cluster of ClusterSet '{}' from '{}' to '{}'...",
        view.domain_name(),
        demoted.name,
        name
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        fence(changes, &old_primary)?;
        if !changes.is_dry_run() {
            sync_with(ctx, &new_primary, &old_primary, timeout)?;
        }
        drop_inbound_channel(changes, &new_primary)?;
        unfence(changes, &new_primary)?;

        let subject = view.metadata.instance(&old_primary).and_then(|i| i.cert_subject.clone());
        let account = refresh_channel_account(changes, &new_primary, &demoted, &demoted_user, subject.as_deref())?;
        start_inbound_channel(changes, &old_primary, &new_source, &account, &demoted_options)?;
        repoint_others(changes, &view, &others, &new_source)?;

        promote_in_metadata(&mut md, &clusterset_id, &target.cluster_id, &others)?;
        if let Some(member) = md
            .clusterset_mut(&clusterset_id)
            .and_then(|cs| cs.member_mut(&demoted.cluster_id))
        {
            member.applied_options = member.options.clone();
            member.replication_account = Some(demoted_user.clone());
        }
        metadata::store(changes, &new_primary, &mut md)
    })?;

    if options.dry_run {
        return Ok(());
    }
    log_event(
        Event::ClusterSetSwitchover,
        &[("from", demoted.name.as_str()), ("to", name)],
    );
    for other in others.iter().filter(|o| o.invalidate) {
        log_event(Event::ClusterInvalidated, &[("cluster", other.cluster.name.as_str())]);
        output.warning(format!(
            "The cluster '{}' was INVALIDATED; run rejoinCluster once it is available again.",
            other.cluster.name
        ));
    }
    output.info(format!(
        "The cluster '{}' was promoted to PRIMARY of ClusterSet '{}'.",
        name,
        view.domain_name()
    ));
    Ok(())
}

/// Emergency failover: promote replica cluster `name` when the primary
/// cluster has lost quorum or is gone. The former primary is invalidated.
pub fn force_primary_cluster(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: ForcePrimaryClusterOptions,
) -> AdminResult<()> {
    let scope = ObservationScope::with_fields("FORCE_PRIMARY_CLUSTER", &[("cluster", name)]);
    let result = failover(ctx, handle, name, &options);
    scope.finish(&result);
    result
}

fn failover(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: &ForcePrimaryClusterOptions,
) -> AdminResult<()> {
    let view = ClusterSetView::load(ctx, handle)?;
    let target = view.require_replica(name, "forcePrimaryCluster")?.clone();
    let former = view.primary_cluster()?.clone();
    if cluster_primary(ctx, &view.metadata, &former.cluster_id).is_some() {
        return Err(AdminError::precondition(
            AdminErrorKind::HasQuorum,
            format!(
                "The PRIMARY cluster '{}' is available; use setPrimaryCluster for a planned switchover.",
                former.name
            ),
        ));
    }
    if view.is_invalidated(&target.cluster_id) {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!("The cluster '{}' is INVALIDATED and cannot be promoted.", name),
        ));
    }
    let new_primary = view.snapshot(ctx, &target.cluster_id)?.require_primary("forcePrimaryCluster")?;
    let others = other_replicas(
        ctx,
        &view,
        &target.cluster_id,
        &options.invalidate_replica_clusters,
        "forcePrimaryCluster",
    )?;
    let new_source = inbound_of(&target, &new_primary, &view.metadata);
    let clusterset_id = view.clusterset.clusterset_id;
    let mut md = view.metadata.clone();

    let output = ctx.output();
    output.warning(format!(
        "Failing over the PRIMARY cluster of ClusterSet '{}' to '{}' without the former PRIMARY \
         '{}'. Transactions it did not replicate are lost.",
        view.domain_name(),
        name,
        former.name
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        if channel(ctx, &new_primary, CLUSTERSET_CHANNEL)?.is_some() {
            drop_inbound_channel(changes, &new_primary)?;
        }
        unfence(changes, &new_primary)?;
        repoint_others(changes, &view, &others, &new_source)?;

        promote_in_metadata(&mut md, &clusterset_id, &target.cluster_id, &others)?;
        if let Some(member) = md
            .clusterset_mut(&clusterset_id)
            .and_then(|cs| cs.member_mut(&former.cluster_id))
        {
            member.invalidated = true;
        }
        metadata::store(changes, &new_primary, &mut md)
    })?;

    if options.dry_run {
        return Ok(());
    }
    log_event(
        Event::ClusterSetFailover,
        &[("from", former.name.as_str()), ("to", name)],
    );
    let invalidated = std::iter::once(&former.name).chain(
        others
            .iter()
            .filter(|o| o.invalidate)
            .map(|o| &o.cluster.name),
    );
    for cluster in invalidated {
        log_event(Event::ClusterInvalidated, &[("cluster", cluster.as_str())]);
        output.warning(format!(
            "The cluster '{}' was INVALIDATED. Use rejoinCluster to bring it back or removeCluster \
             to drop it.",
            cluster
        ));
    }
    output.info(format!(
        "The cluster '{}' was forcefully promoted to PRIMARY of ClusterSet '{}'.",
        name,
        view.domain_name()
    ));
    Ok(())
}
