//! Removing, rejoining and re-sourcing Read-Replicas.

use super::sources::{plan_sources, repoint, start_channel, validate_sources};
use crate::changes::run_reverting;
use crate::cluster::accounts::{account_spec, create_account, drop_account, replica_account};
use crate::cluster::confirm_unreachable;
use crate::cluster::join::clone_from;
use crate::cluster::plan_provisioning;
use crate::cluster::target::TargetInstance;
use crate::context::AdminContext;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{Statement, READ_REPLICA_CHANNEL};
use crate::metadata::{self, InstanceRecord, ReadReplicaRecord};
use crate::observability::{log_event, Event};
use crate::options::{timeout_from_secs, RejoinInstanceOptions, RemoveInstanceOptions};
use crate::quorum::{channel, check_appliers, check_identity_unique, sync_with, wait_for_sync, ClusterSnapshot};
use crate::topology::{RecoveryMethod, ReplicationSources};

fn channel_exists(ctx: &AdminContext, record: &InstanceRecord) -> AdminResult<bool> {
    Ok(channel(ctx, &record.address, READ_REPLICA_CHANNEL)?.is_some())
}

/// `removeInstance` of a Read-Replica.
///
/// The replica is never part of the group, so only its channel and its
/// metadata entry go away. An unreachable replica needs `force`.
pub(crate) fn remove_read_replica(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    record: &InstanceRecord,
    options: &RemoveInstanceOptions,
) -> AdminResult<()> {
    let address = &record.address;
    let output = ctx.output();
    let force = options.force.unwrap_or(false);
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);

    let reachable = match ctx.connect(address) {
        Ok(_) => true,
        Err(e) => {
            if !confirm_unreachable(ctx, address, options.force) {
                let mut error = AdminError::new(
                    AdminErrorKind::Connectivity,
                    format!(
                        "The Read-Replica '{}' is not reachable. Use the 'force' option to remove \
                         it from the metadata only.",
                        address
                    ),
                );
                if let Some(cause) = e.cause {
                    error = error.with_cause(cause);
                }
                return Err(error);
            }
            output.warning(format!(
                "The Read-Replica '{}' is not reachable; it will only be removed from the metadata.",
                address
            ));
            false
        }
    };

    let mut has_channel = false;
    if reachable {
        has_channel = channel_exists(ctx, record)?;
        if let Err(e) = check_appliers(ctx, address) {
            if !force {
                return Err(e);
            }
            output.warning(format!("{} Removing the Read-Replica anyway (force).", e.message));
        }
        if has_channel {
            if let Some(primary) = snapshot.primary() {
                if let Err(e) = sync_with(ctx, address, &primary, timeout) {
                    if !force {
                        return Err(e);
                    }
                    output.warning(format!("{} Continuing without synchronization (force).", e.message));
                }
            }
        }
    }

    let (writer, mut md) = snapshot.metadata_writer(ctx, "removeInstance")?;
    run_reverting(ctx, options.dry_run, |changes| {
        let previous = md.to_document()?;
        md.remove_instance(address);
        metadata::store(changes, &writer, &mut md)?;
        changes.on_revert(&writer, Statement::StoreMetadata { document: previous });

        if let Some(ref user) = record.replication_account {
            drop_account(changes, &writer, user)?;
        }
        if reachable && has_channel {
            let channel = READ_REPLICA_CHANNEL.to_string();
            changes.apply(
                address,
                Statement::StopReplica {
                    channel: channel.clone(),
                },
            )?;
            changes.apply(address, Statement::ResetReplica { channel })?;
        }
        Ok(())
    })?;

    if !options.dry_run {
        log_event(
            Event::MemberRemoved,
            &[
                ("cluster", snapshot.name()),
                ("instance", address.to_string().as_str()),
                ("read_replica", "true"),
                ("metadata_only", if reachable { "false" } else { "true" }),
            ],
        );
        output.info(format!(
            "The Read-Replica '{}' was successfully removed from the cluster.",
            address
        ));
    }
    Ok(())
}

/// `rejoinInstance` of a Read-Replica: rebuild its channel from scratch.
pub(crate) fn rejoin_read_replica(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    record: &InstanceRecord,
    options: &RejoinInstanceOptions,
) -> AdminResult<()> {
    snapshot.require_quorum("rejoinInstance")?;
    let address = &record.address;
    let cluster = snapshot.cluster.clone();
    let output = ctx.output();

    let target = TargetInstance::inspect(ctx, address)?;
    check_identity_unique(&snapshot.metadata, address, &target.identity)?;
    let sources = record
        .read_replica
        .as_ref()
        .map(|r| r.replication_sources.clone())
        .unwrap_or_default();
    let plan = plan_sources(snapshot, &sources)?;

    let existing = target
        .channels
        .iter()
        .find(|c| c.channel == READ_REPLICA_CHANNEL)
        .cloned();
    if let Some(ref status) = existing {
        if status.io_state != "OFF" && !status.has_error() && status.sources == plan.source_strings() {
            output.note(format!(
                "The Read-Replica '{}' is already replicating from cluster '{}'.",
                address, cluster.name
            ));
            return Ok(());
        }
    }

    let requested = options.recovery_method.unwrap_or(RecoveryMethod::Auto);
    let mut provisioning = plan_provisioning(ctx, snapshot, &target, requested, "rejoinInstance")?;
    provisioning.donor = plan.initial.clone();
    let (writer, mut md) = snapshot.metadata_writer(ctx, "rejoinInstance")?;
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);

    output.info(format!(
        "Rejoining Read-Replica '{}' to cluster '{}'...",
        address, cluster.name
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let user = record
            .replication_account
            .clone()
            .unwrap_or_else(|| replica_account(target.identity.server_id));
        let spec = account_spec(user.clone(), &cluster, record.cert_subject.as_deref());
        create_account(changes, &writer, &spec)?;
        if existing.is_some() {
            let channel = READ_REPLICA_CHANNEL.to_string();
            changes.apply(
                address,
                Statement::StopReplica {
                    channel: channel.clone(),
                },
            )?;
            changes.apply(address, Statement::ResetReplica { channel })?;
        }
        if provisioning.method == RecoveryMethod::Clone {
            clone_from(changes, address, &provisioning.donor, 2)?;
        }
        start_channel(changes, address, &plan, &user, spec.password.clone())?;
        if !changes.is_dry_run() {
            wait_for_sync(ctx, address, &provisioning.source_executed, timeout)?;
        }
        if record.replication_account.is_none() {
            if let Some(entry) = md.instance_mut(address) {
                entry.replication_account = Some(user);
            }
            metadata::store(changes, &writer, &mut md)?;
        }
        Ok(())
    })?;

    if !options.dry_run {
        output.info(format!(
            "The Read-Replica '{}' was successfully rejoined to the cluster.",
            address
        ));
    }
    Ok(())
}

/// `setInstanceOption(replicationSources)`.
///
/// The metadata always takes the new policy; the live channel follows it
/// right away when the replica can be reached.
pub(crate) fn set_replication_sources(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    record: &InstanceRecord,
    sources: &ReplicationSources,
) -> AdminResult<()> {
    snapshot.require_quorum("setInstanceOption")?;
    validate_sources(snapshot, sources)?;
    let plan = plan_sources(snapshot, sources)?;
    let address = &record.address;
    let output = ctx.output();

    let has_channel = ctx.is_reachable(address) && channel_exists(ctx, record).unwrap_or(false);
    let (writer, mut md) = snapshot.metadata_writer(ctx, "setInstanceOption")?;

    run_reverting(ctx, false, |changes| {
        if let Some(entry) = md.instance_mut(address) {
            entry.read_replica = Some(ReadReplicaRecord {
                replication_sources: sources.clone(),
            });
        }
        metadata::store(changes, &writer, &mut md)?;
        if has_channel {
            repoint(changes, address, &plan)?;
        }
        Ok(())
    })?;

    if has_channel {
        log_event(
            Event::SourceReconfigured,
            &[
                ("instance", address.to_string().as_str()),
                ("sources", sources.to_string().as_str()),
            ],
        );
    } else {
        output.warning(format!(
            "The replication channel of '{}' could not be updated; run rejoinInstance on it to \
             apply the new sources.",
            address
        ));
    }
    output.info(format!(
        "Successfully set the value of 'replicationSources' to '{}' in the cluster member '{}'.",
        sources, address
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{rejoin_instance, remove_instance};
    use crate::fixtures::Lab;
    use crate::options::AddReplicaInstanceOptions;
    use crate::replica::add_replica_instance;

    fn with_replica(sources: Option<ReplicationSources>) -> (Lab, crate::topology::InstanceAddress) {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        let replica = lab.spare(3340);
        let options = AddReplicaInstanceOptions {
            replication_sources: sources,
            ..AddReplicaInstanceOptions::default()
        };
        add_replica_instance(&lab.ctx, &lab.handle, &replica, options).unwrap();
        lab.ctx.output().take();
        (lab, replica)
    }

    #[test]
    fn test_remove_drops_channel_and_account() {
        let (lab, replica) = with_replica(None);
        remove_instance(&lab.ctx, &lab.handle, &replica, RemoveInstanceOptions::default()).unwrap();

        assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
        assert!(lab.metadata().instance(&replica).is_none());
        assert!(!lab
            .fleet
            .accounts(&lab.members[0])
            .iter()
            .any(|(user, _)| user.starts_with("mysql_innodb_replica_")));
    }

    #[test]
    fn test_remove_unreachable_needs_force() {
        let (lab, replica) = with_replica(None);
        lab.fleet.kill(&replica).unwrap();
        let err = remove_instance(&lab.ctx, &lab.handle, &replica, RemoveInstanceOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::Connectivity);

        let options = RemoveInstanceOptions {
            force: Some(true),
            ..RemoveInstanceOptions::default()
        };
        remove_instance(&lab.ctx, &lab.handle, &replica, options).unwrap();
        assert!(lab.metadata().instance(&replica).is_none());
    }

    #[test]
    fn test_rejoin_rebuilds_a_failed_channel() {
        let (lab, replica) = with_replica(None);
        lab.fleet
            .set_applier_error(&replica, READ_REPLICA_CHANNEL, Some("Table 'app.t1' doesn't exist"))
            .unwrap();
        rejoin_instance(&lab.ctx, &lab.handle, &replica, RejoinInstanceOptions::default()).unwrap();
        assert_eq!(
            lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
            Some(lab.members[0].clone())
        );
        assert!(lab.ctx.output().contains("successfully rejoined"));
    }

    #[test]
    fn test_rejoin_of_healthy_replica_is_a_no_op() {
        let (lab, replica) = with_replica(None);
        rejoin_instance(&lab.ctx, &lab.handle, &replica, RejoinInstanceOptions::default()).unwrap();
        assert!(lab.ctx.output().contains("already replicating"));
    }

    #[test]
    fn test_new_sources_move_the_channel() {
        let (lab, replica) = with_replica(None);
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        let record = snapshot.metadata.instance(&replica).cloned().unwrap();
        let sources = ReplicationSources::List(vec![lab.members[2].clone()]);
        set_replication_sources(&lab.ctx, &snapshot, &record, &sources).unwrap();

        assert_eq!(
            lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
            Some(lab.members[2].clone())
        );
        let stored = lab.metadata();
        assert_eq!(
            stored.instance(&replica).and_then(|r| r.read_replica.clone()),
            Some(ReadReplicaRecord {
                replication_sources: sources
            })
        );
    }
}
