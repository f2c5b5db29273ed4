//! dissolve

use super::accounts::drop_account;
use super::remove_instance::confirm_unreachable;
use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{Statement, READ_REPLICA_CHANNEL};
use crate::observability::ObservationScope;
use crate::options::{timeout_from_secs, DissolveOptions};
use crate::quorum::{channel, sync_with, ClusterSnapshot};
use crate::topology::InstanceAddress;

/// Stop replication on every member and drop the cluster's metadata.
///
/// User data is left in place. Refused while the cluster belongs to a
/// ClusterSet.
pub fn dissolve(ctx: &AdminContext, handle: &ClusterHandle, options: DissolveOptions) -> AdminResult<()> {
    let scope = ObservationScope::with_fields("DISSOLVE", &[("cluster", handle.name.as_str())]);
    let result = run(ctx, handle, &options);
    scope.finish(&result);
    result
}

fn run(ctx: &AdminContext, handle: &ClusterHandle, options: &DissolveOptions) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    if let Some(cs) = snapshot.clusterset() {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' belongs to the ClusterSet '{}'; remove it from the ClusterSet first.",
                snapshot.name(),
                cs.domain_name
            ),
        ));
    }
    let primary = snapshot.require_primary("dissolve")?;
    let force = options.force.unwrap_or(false);
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let output = ctx.output();

    for member in snapshot.members.iter().filter(|m| !m.is_online()) {
        if !confirm_unreachable(ctx, member.address(), options.force) {
            return Err(AdminError::new(
                AdminErrorKind::Connectivity,
                format!(
                    "The instance '{}' is {} and cannot be dissolved with the cluster. Use the \
                     'force' option to go on without it.",
                    member.address(),
                    member.state.as_str()
                ),
            ));
        }
        output.warning(format!(
            "The instance '{}' cannot be reached; stop group replication on it manually.",
            member.address()
        ));
    }

    // Primary last so the remaining members keep a writable source.
    let mut online: Vec<InstanceAddress> = snapshot
        .online_members()
        .into_iter()
        .map(|m| m.address().clone())
        .filter(|a| *a != primary)
        .collect();
    for address in &online {
        if let Err(e) = sync_with(ctx, address, &primary, timeout) {
            if !force {
                return Err(e);
            }
            output.warning(format!("{} Dissolving anyway (force).", e.message));
        }
    }
    online.push(primary.clone());
    let read_replicas: Vec<InstanceAddress> = snapshot
        .read_replicas()
        .into_iter()
        .map(|r| r.address.clone())
        .filter(|a| ctx.is_reachable(a))
        .collect();
    let accounts: Vec<String> = snapshot
        .metadata
        .instances
        .iter()
        .filter(|i| i.cluster_id == snapshot.cluster_id())
        .filter_map(|i| i.replication_account.clone())
        .collect();

    output.info(format!("Dissolving cluster '{}'...", snapshot.name()));
    run_reverting(ctx, options.dry_run, |changes| {
        for user in &accounts {
            drop_account(changes, &primary, user)?;
        }
        changes.apply(&primary, Statement::DropMetadata)?;
        for replica in &read_replicas {
            if channel(ctx, replica, READ_REPLICA_CHANNEL)?.is_some() {
                let channel = READ_REPLICA_CHANNEL.to_string();
                changes.apply(replica, Statement::StopReplica { channel: channel.clone() })?;
                changes.apply(replica, Statement::ResetReplica { channel })?;
            }
        }
        for address in &online {
            changes.apply(address, Statement::set_persist("group_replication_start_on_boot", "OFF"))?;
            changes.apply(address, Statement::StopGroupReplication)?;
        }
        Ok(())
    })?;

    if !options.dry_run {
        output.info(format!(
            "The cluster '{}' was successfully dissolved. Replication was disabled but user data was left intact.",
            snapshot.name()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusterset::create_cluster_set;
    use crate::fixtures::Lab;
    use crate::options::{AddReplicaInstanceOptions, CreateClusterSetOptions};
    use crate::replica::add_replica_instance;

    #[test]
    fn test_dissolve_leaves_standalone_instances() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3330);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default()).unwrap();
        lab.fleet.write_transactions(&lab.members[0], 2).unwrap();

        dissolve(&lab.ctx, &lab.handle, DissolveOptions::default()).unwrap();
        for member in &lab.members {
            assert!(lab.fleet.metadata_document(member).is_none());
        }
        assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
        assert_eq!(
            lab.fleet.gtid_executed(&lab.members[1]),
            lab.fleet.gtid_executed(&lab.members[0])
        );
        assert!(lab.ctx.output().contains("successfully dissolved"));
    }

    #[test]
    fn test_unreachable_member_needs_force() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        lab.fleet.kill(&lab.members[2]).unwrap();
        // Kept in the metadata, so it shows up as missing.
        let err = dissolve(&lab.ctx, &lab.handle, DissolveOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::Connectivity);

        let options = DissolveOptions {
            force: Some(true),
            ..DissolveOptions::default()
        };
        dissolve(&lab.ctx, &lab.handle, options).unwrap();
        assert!(lab.fleet.metadata_document(&lab.members[0]).is_none());
    }

    #[test]
    fn test_refused_inside_clusterset() {
        let lab = Lab::cluster("prod", &[3310]);
        create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let err = dissolve(&lab.ctx, &lab.handle, DissolveOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidState);
    }
}
