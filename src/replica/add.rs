//! addReplicaInstance

use chrono::Utc;

use super::sources::{plan_sources, start_channel, validate_sources};
use crate::changes::run_reverting;
use crate::cluster::accounts::{account_spec, create_account, replica_account};
use crate::cluster::auth::check_member_subject;
use crate::cluster::join::clone_from;
use crate::cluster::plan_provisioning;
use crate::cluster::target::TargetInstance;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::AdminResult;
use crate::metadata::{self, InstanceRecord, ReadReplicaRecord};
use crate::observability::ObservationScope;
use crate::options::{timeout_from_secs, AddReplicaInstanceOptions};
use crate::quorum::{check_label_unique, wait_for_sync, ClusterSnapshot};
use crate::topology::{validate_label, InstanceAddress, RecoveryMethod};

/// Attach a standalone instance to the cluster as a Read-Replica.
pub fn add_replica_instance(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: AddReplicaInstanceOptions,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "ADD_REPLICA_INSTANCE",
        &[("cluster", handle.name.as_str()), ("instance", target_text.as_str())],
    );
    let result = add(ctx, handle, address, &options);
    scope.finish(&result);
    result
}

fn add(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: &AddReplicaInstanceOptions,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    snapshot.require_quorum("addReplicaInstance")?;
    let cluster = snapshot.cluster.clone();

    let target = TargetInstance::inspect(ctx, address)?;
    target.ensure_standalone(&snapshot.metadata, &cluster.name)?;
    check_member_subject(cluster.member_auth_type, options.cert_subject.as_deref())?;
    // Only an explicit label is validated; the default is the address itself.
    let label = match options.label.as_deref() {
        Some(label) => {
            validate_label(label)?;
            label.to_string()
        }
        None => address.to_string(),
    };
    check_label_unique(&snapshot.metadata, &cluster.cluster_id, &label, None)?;

    let sources = options.replication_sources.clone().unwrap_or_default();
    validate_sources(&snapshot, &sources)?;
    let plan = plan_sources(&snapshot, &sources)?;

    let mut provisioning =
        plan_provisioning(ctx, &snapshot, &target, options.recovery_method(), "addReplicaInstance")?;
    provisioning.donor = plan.initial.clone();
    let (writer, mut md) = snapshot.metadata_writer(ctx, "addReplicaInstance")?;
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let progress = options.recovery_progress.unwrap_or(2);

    let output = ctx.output();
    output.info(format!(
        "Adding '{}' to cluster '{}' as a Read-Replica replicating from {} (recoveryMethod={}).",
        address,
        cluster.name,
        sources,
        provisioning.method.as_str()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let user = replica_account(target.identity.server_id);
        let spec = account_spec(user.clone(), &cluster, options.cert_subject.as_deref());
        create_account(changes, &writer, &spec)?;
        if provisioning.method == RecoveryMethod::Clone {
            clone_from(changes, address, &provisioning.donor, progress)?;
        }
        start_channel(changes, address, &plan, &user, spec.password.clone())?;
        if !changes.is_dry_run() {
            wait_for_sync(ctx, address, &provisioning.source_executed, timeout)?;
        }

        md.instances.push(InstanceRecord {
            cluster_id: cluster.cluster_id,
            address: address.clone(),
            server_uuid: target.identity.server_uuid,
            server_id: target.identity.server_id,
            label: label.clone(),
            cert_subject: options.cert_subject.clone(),
            replication_account: Some(user),
            read_replica: Some(ReadReplicaRecord {
                replication_sources: sources.clone(),
            }),
            joined_at: Utc::now(),
        });
        metadata::store(changes, &writer, &mut md)
    })?;

    if !options.dry_run {
        output.info(format!(
            "The instance '{}' was successfully added as a Read-Replica of cluster '{}'.",
            address, cluster.name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AdminErrorKind;
    use crate::fixtures::Lab;
    use crate::gateway::READ_REPLICA_CHANNEL;
    use crate::topology::ReplicationSources;

    #[test]
    fn test_replica_follows_primary_by_default() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3330);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default())
            .unwrap();

        assert_eq!(
            lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL),
            Some(lab.members[0].clone())
        );
        let md = lab.metadata();
        let record = md.instance(&replica).unwrap();
        assert!(record.is_read_replica());
        assert_eq!(record.label, "127.0.0.1:3330");
        assert_eq!(record.replication_account.as_deref(), Some("mysql_innodb_replica_3"));
        assert!(lab.ctx.output().contains("successfully added as a Read-Replica"));
    }

    #[test]
    fn test_replica_cannot_join_twice() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3330);
        add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default())
            .unwrap();
        let err = add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::AlreadyMember);
    }

    #[test]
    fn test_failed_start_is_reverted() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3330);
        lab.fleet.fail_next(&replica, "START_REPLICA").unwrap();
        let err = add_replica_instance(&lab.ctx, &lab.handle, &replica, AddReplicaInstanceOptions::default());
        assert!(err.is_err());

        assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
        assert!(!lab
            .fleet
            .accounts(&lab.members[0])
            .iter()
            .any(|(user, _)| user.starts_with("mysql_innodb_replica_")));
        let md = lab.metadata();
        assert!(md.instance(&replica).is_none());
        assert!(lab.ctx.output().contains("Changes successfully reverted."));
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let replica = lab.spare(3330);
        let options = AddReplicaInstanceOptions {
            replication_sources: Some(ReplicationSources::secondary()),
            dry_run: true,
            ..AddReplicaInstanceOptions::default()
        };
        add_replica_instance(&lab.ctx, &lab.handle, &replica, options).unwrap();
        assert!(lab.fleet.channel_source(&replica, READ_REPLICA_CHANNEL).is_none());
        let md = lab.metadata();
        assert!(md.instance(&replica).is_none());
    }
}
