//! removeCluster and rejoinCluster

use super::channel::{
    drop_inbound_channel, fence, in_place_changes, needs_rebuild, refresh_channel_account, start_inbound_channel,
    unfence, update_inbound_channel, without_nulls, InboundSource,
};
use super::view::ClusterSetView;
use crate::changes::run_reverting;
use crate::cluster::accounts::{clusterset_account, drop_account};
use crate::context::{AdminContext, ClusterSetHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{Statement, CLUSTERSET_CHANNEL, READ_REPLICA_CHANNEL};
use crate::metadata::{self, ClusterRecord};
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::{timeout_from_secs, RejoinClusterOptions, RemoveClusterOptions};
use crate::quorum::{channel, gtid_state, server_identity, sync_with};
use crate::topology::InstanceAddress;

fn missing_member_record(cluster: &ClusterRecord) -> AdminError {
    AdminError::internal(format!(
        "The cluster '{}' has no ClusterSet member record.",
        cluster.name
    ))
}

/// Detach a replica cluster from the ClusterSet.
///
/// A reachable cluster is synced, its channel removed and its members left
/// as standalone instances. An unreachable one is only dropped from the
/// metadata, and only with `force`.
pub fn remove_cluster(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: RemoveClusterOptions,
) -> AdminResult<()> {
    let scope = ObservationScope::with_fields("REMOVE_CLUSTER", &[("cluster", name)]);
    let result = remove(ctx, handle, name, &options);
    scope.finish(&result);
    result
}

fn remove(ctx: &AdminContext, handle: &ClusterSetHandle, name: &str, options: &RemoveClusterOptions) -> AdminResult<()> {
    let view = ClusterSetView::load(ctx, handle)?;
    let cluster = view.require_replica(name, "removeCluster")?.clone();
    let cluster_id = cluster.cluster_id;
    let writer = view.require_writer(ctx, "removeCluster")?;
    let member = view
        .member_record(&cluster_id)
        .cloned()
        .ok_or_else(|| missing_member_record(&cluster))?;
    let snapshot = view.snapshot(ctx, &cluster_id)?;
    let replica_primary = snapshot.primary();
    let output = ctx.output();

    match replica_primary {
        None if !options.force => {
            return Err(AdminError::new(
                AdminErrorKind::Connectivity,
                format!(
                    "The cluster '{}' is not reachable. Use the 'force' option to remove it from \
                     the ClusterSet metadata only.",
                    name
                ),
            ))
        }
        None => output.warning(format!(
            "The cluster '{}' is not reachable; it is removed from the metadata only. Its \
             instances must be reset before they are reused.",
            name
        )),
        Some(ref primary) => {
            let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
            if let Err(e) = sync_with(ctx, primary, &writer, timeout) {
                if !options.force {
                    return Err(e);
                }
                output.warning(format!(
                    "The cluster '{}' could not catch up with the PRIMARY cluster: {}. Removing it anyway.",
                    name, e.message
                ));
            }
        }
    }

    // Secondaries first so the group never elects a new primary mid-way.
    let mut members: Vec<InstanceAddress> = snapshot
        .online_members()
        .into_iter()
        .map(|m| m.address().clone())
        .filter(|a| Some(a) != replica_primary.as_ref())
        .collect();
    members.extend(replica_primary.clone());
    let read_replicas: Vec<InstanceAddress> = snapshot
        .read_replicas()
        .into_iter()
        .map(|r| r.address.clone())
        .filter(|a| ctx.is_reachable(a))
        .collect();

    let mut md = metadata::load(ctx, &writer)?;
    output.info(format!(
        "Removing cluster '{}' from ClusterSet '{}'...",
        name,
        view.domain_name()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        if let Some(ref primary) = replica_primary {
            if channel(ctx, primary, CLUSTERSET_CHANNEL)?.is_some() {
                drop_inbound_channel(changes, primary)?;
            }
        }

        let accounts: Vec<String> = md
            .instances
            .iter()
            .filter(|i| i.cluster_id == cluster_id)
            .filter_map(|i| i.replication_account.clone())
            .chain(member.replication_account.clone())
            .collect();
        for user in &accounts {
            drop_account(changes, &writer, user)?;
        }
        md.instances.retain(|i| i.cluster_id != cluster_id);
        md.clusters.retain(|c| c.cluster_id != cluster_id);
        if let Some(cs) = md.clusterset_mut(&view.clusterset.clusterset_id) {
            cs.members.retain(|m| m.cluster_id != cluster_id);
        }
        metadata::store(changes, &writer, &mut md)?;

        let Some(ref primary) = replica_primary else {
            return Ok(());
        };
        unfence(changes, primary)?;
        changes.apply(primary, Statement::DropMetadata)?;
        for replica in &read_replicas {
            if channel(ctx, replica, READ_REPLICA_CHANNEL)?.is_some() {
                let channel = READ_REPLICA_CHANNEL.to_string();
                changes.apply(replica, Statement::StopReplica { channel: channel.clone() })?;
                changes.apply(replica, Statement::ResetReplica { channel })?;
            }
        }
        for address in &members {
            changes.apply(address, Statement::StopGroupReplication)?;
            changes.apply(address, Statement::SetSuperReadOnly { enabled: false })?;
        }
        Ok(())
    })?;

    if !options.dry_run {
        log_event(
            Event::ClusterRemoved,
            &[("cluster", name), ("clusterset", view.domain_name())],
        );
        output.info(format!(
            "The cluster '{}' was removed from the ClusterSet '{}'.",
            name,
            view.domain_name()
        ));
    }
    Ok(())
}

/// Bring a replica cluster's channel back in line with the metadata.
///
/// The channel is recreated when it is missing, replicates from the wrong
/// group, has failed, when an option moved to or from `null`, or when the
/// cluster was invalidated. Other option changes are applied in place.
pub fn rejoin_cluster(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    name: &str,
    options: RejoinClusterOptions,
) -> AdminResult<()> {
    let scope = ObservationScope::with_fields("REJOIN_CLUSTER", &[("cluster", name)]);
    let result = rejoin(ctx, handle, name, &options);
    scope.finish(&result);
    result
}

fn rejoin(ctx: &AdminContext, handle: &ClusterSetHandle, name: &str, options: &RejoinClusterOptions) -> AdminResult<()> {
    let view = ClusterSetView::load(ctx, handle)?;
    let cluster = view.require_replica(name, "rejoinCluster")?.clone();
    let cluster_id = cluster.cluster_id;
    let writer = view.require_writer(ctx, "rejoinCluster")?;
    let member = view
        .member_record(&cluster_id)
        .cloned()
        .ok_or_else(|| missing_member_record(&cluster))?;
    let snapshot = view.snapshot(ctx, &cluster_id)?;
    let replica_primary = snapshot.require_primary("rejoinCluster")?;

    let (replica_executed, _) = gtid_state(ctx, &replica_primary)?;
    let (primary_executed, _) = gtid_state(ctx, &writer)?;
    let errant = replica_executed.subtract(&primary_executed);
    if !errant.is_empty() {
        return Err(AdminError::precondition(
            AdminErrorKind::ErrantTransactions,
            format!(
                "The cluster '{}' has transactions the PRIMARY cluster does not have: {}. It \
                 cannot rejoin the ClusterSet; remove it and create it again.",
                name, errant
            ),
        ));
    }

    let source = InboundSource::of(ctx, &view.metadata, &view.primary_id())
        .ok_or_else(|| AdminError::internal("The PRIMARY cluster has no writable member."))?;
    let status = channel(ctx, &replica_primary, CLUSTERSET_CHANNEL)?;
    let identity = server_identity(ctx, &replica_primary)?;
    let rebuild_reason = match status {
        _ if member.invalidated => Some("invalidated"),
        None => Some("missing"),
        Some(ref s) if !source.is_source_of(s) => Some("source_changed"),
        Some(ref s) if s.has_error() => Some("channel_error"),
        Some(_) if needs_rebuild(&member.options, &member.applied_options) => Some("option_reset"),
        Some(_) => None,
    };
    let update = in_place_changes(&member.options, &member.applied_options);
    let output = ctx.output();
    if rebuild_reason.is_none() && update.is_empty() && identity.super_read_only {
        output.note(format!(
            "The cluster '{}' is already replicating from the PRIMARY cluster; nothing to do.",
            name
        ));
        return Ok(());
    }

    let user = member
        .replication_account
        .clone()
        .unwrap_or_else(|| clusterset_account(identity.server_id));
    let subject = view
        .metadata
        .instance(&replica_primary)
        .and_then(|i| i.cert_subject.clone());
    let clusterset_id = view.clusterset.clusterset_id;
    let mut md = metadata::load(ctx, &writer)?;

    output.info(format!(
        "Rejoining cluster '{}' to ClusterSet '{}'...",
        name,
        view.domain_name()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        if rebuild_reason.is_some() {
            if status.is_some() {
                drop_inbound_channel(changes, &replica_primary)?;
            }
            let account = refresh_channel_account(changes, &writer, &cluster, &user, subject.as_deref())?;
            start_inbound_channel(changes, &replica_primary, &source, &account, &member.options)?;
        } else if !update.is_empty() {
            update_inbound_channel(changes, &replica_primary, update.clone())?;
        }
        if !identity.super_read_only {
            fence(changes, &replica_primary)?;
        }

        let record = md
            .clusterset_mut(&clusterset_id)
            .and_then(|cs| cs.member_mut(&cluster_id))
            .ok_or_else(|| missing_member_record(&cluster))?;
        record.invalidated = false;
        if rebuild_reason.is_some() {
            record.options = without_nulls(&record.options);
        }
        record.applied_options = record.options.clone();
        record.replication_account = Some(user.clone());
        metadata::store(changes, &writer, &mut md)
    })?;

    if options.dry_run {
        return Ok(());
    }
    let primary_text = replica_primary.to_string();
    match rebuild_reason {
        Some(reason) => log_event(
            Event::ChannelRebuilt,
            &[("cluster", name), ("instance", primary_text.as_str()), ("reason", reason)],
        ),
        None => log_event(
            Event::ChannelUpdated,
            &[("cluster", name), ("instance", primary_text.as_str())],
        ),
    }
    output.info(format!(
        "The cluster '{}' was rejoined to the ClusterSet '{}'.",
        name,
        view.domain_name()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cluster::set_option;
    use crate::context::ClusterHandle;
    use crate::fixtures::Lab;

    #[test]
    fn test_removed_cluster_becomes_standalone() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410, 4420]);
        remove_cluster(&lab.ctx, &cs, "dr", RemoveClusterOptions::default()).unwrap();

        let md = lab.metadata();
        assert!(md.cluster_by_name("dr").is_none());
        assert_eq!(md.clustersets[0].members.len(), 1);
        for member in &dr {
            assert!(lab.fleet.channel_source(member, CLUSTERSET_CHANNEL).is_none());
            assert!(lab.fleet.metadata_document(member).is_none());
        }
        assert!(!lab
            .fleet
            .accounts(&lab.members[0])
            .iter()
            .any(|(user, _)| user.starts_with("mysql_innodb_cs_")));
    }

    #[test]
    fn test_unreachable_cluster_needs_force() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        lab.fleet.kill(&dr[0]).unwrap();

        let err = remove_cluster(&lab.ctx, &cs, "dr", RemoveClusterOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::Connectivity);

        let options = RemoveClusterOptions {
            force: true,
            ..RemoveClusterOptions::default()
        };
        remove_cluster(&lab.ctx, &cs, "dr", options).unwrap();
        assert!(lab.metadata().cluster_by_name("dr").is_none());
        assert!(lab.ctx.output().contains("removed from the metadata only"));
    }

    #[test]
    fn test_primary_cluster_cannot_be_removed() {
        let (lab, cs, _) = Lab::clusterset("prod", &[3310], &[4410]);
        let err = remove_cluster(&lab.ctx, &cs, "prod", RemoveClusterOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidState);
    }

    #[test]
    fn test_rejoin_with_nothing_to_do() {
        let (lab, cs, _) = Lab::clusterset("prod", &[3310], &[4410]);
        rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap();
        assert!(lab.ctx.output().contains("nothing to do"));
    }

    #[test]
    fn test_rejoin_applies_changed_option_in_place() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        let dr_handle = ClusterHandle::new("dr", dr[0].clone());
        set_option(&lab.ctx, &dr_handle, "clusterSetReplicationConnectRetry", &json!(12)).unwrap();
        assert!(lab.ctx.output().contains("Run rejoinCluster('dr')"));

        rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap();
        let status = channel(&lab.ctx, &dr[0], CLUSTERSET_CHANNEL).unwrap().unwrap();
        assert_eq!(status.connect_retry, Some(12));
        let md = lab.metadata();
        let id = md.cluster_by_name("dr").unwrap().cluster_id;
        let member = md.clustersets[0].member(&id).unwrap();
        assert_eq!(member.applied_options, member.options);
    }

    #[test]
    fn test_rejoin_resets_channel_for_null() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        let dr_handle = ClusterHandle::new("dr", dr[0].clone());
        set_option(&lab.ctx, &dr_handle, "clusterSetReplicationConnectRetry", &json!(12)).unwrap();
        rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap();
        set_option(&lab.ctx, &dr_handle, "clusterSetReplicationConnectRetry", &json!(null)).unwrap();

        let md = lab.metadata();
        let id = md.cluster_by_name("dr").unwrap().cluster_id;
        let stored = md.clustersets[0].member(&id).unwrap();
        assert_eq!(stored.options.get("clusterSetReplicationConnectRetry"), Some(&json!(null)));

        rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap();
        let status = channel(&lab.ctx, &dr[0], CLUSTERSET_CHANNEL).unwrap().unwrap();
        assert_eq!(status.connect_retry, Some(super::super::channel::BUILTIN_CONNECT_RETRY));
        let md = lab.metadata();
        let stored = md.clustersets[0].member(&id).unwrap();
        assert!(!stored.options.contains_key("clusterSetReplicationConnectRetry"));
    }

    #[test]
    fn test_rejoin_refuses_errant_transactions() {
        let (lab, cs, dr) = Lab::clusterset("prod", &[3310], &[4410]);
        lab.ctx
            .execute(&dr[0], &Statement::SetSuperReadOnly { enabled: false })
            .unwrap();
        lab.fleet.write_transactions(&dr[0], 1).unwrap();
        let err = rejoin_cluster(&lab.ctx, &cs, "dr", RejoinClusterOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::ErrantTransactions);
    }
}
