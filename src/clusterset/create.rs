//! createClusterSet and createReplicaCluster

use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use super::channel::{refresh_channel_account, start_inbound_channel, fence, InboundSource};
use super::view::ClusterSetView;
use crate::changes::run_reverting;
use crate::cluster::accounts::{account_spec, cluster_account, clusterset_account, create_account};
use crate::cluster::auth::check_member_subject;
use crate::cluster::create::{derive_group_name, new_cluster_record};
use crate::cluster::join::{clone_from, configure_member, set_recovery_account, start_member, COMMUNICATION_STACK_ATTRIBUTE};
use crate::cluster::plan_provisioning;
use crate::cluster::target::TargetInstance;
use crate::context::{AdminContext, ClusterHandle, ClusterSetHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::metadata::{self, ClusterSetMemberRecord, ClusterSetRecord, InstanceRecord};
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::{timeout_from_secs, CreateClusterSetOptions, CreateReplicaClusterOptions, OperationOptions};
use crate::quorum::{sync_with, ClusterSnapshot};
use crate::topology::{validate_cluster_name, InstanceAddress, RecoveryMethod, TopologyMode};

/// Turn a single-primary cluster into the primary cluster of a new
/// ClusterSet called `domain`.
pub fn create_cluster_set(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    domain: &str,
    options: CreateClusterSetOptions,
) -> AdminResult<ClusterSetHandle> {
    let scope = ObservationScope::with_fields(
        "CREATE_CLUSTERSET",
        &[("cluster", handle.name.as_str()), ("domain", domain)],
    );
    let result = create_set(ctx, handle, domain, &options);
    scope.finish(&result);
    result
}

fn create_set(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    domain: &str,
    options: &CreateClusterSetOptions,
) -> AdminResult<ClusterSetHandle> {
    validate_cluster_name(domain)?;
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let primary = snapshot.require_primary("createClusterSet")?;
    if let Some(cs) = snapshot.clusterset() {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' is already part of the ClusterSet '{}'.",
                snapshot.name(),
                cs.domain_name
            ),
        ));
    }
    if snapshot.topology_mode() != TopologyMode::SinglePrimary {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' is running in multi-primary mode; a ClusterSet requires single-primary clusters.",
                snapshot.name()
            ),
        ));
    }
    let cluster_id = snapshot.cluster_id();
    let mut md = metadata::load(ctx, &primary)?;

    let output = ctx.output();
    output.info(format!(
        "Creating ClusterSet '{}' with cluster '{}' as PRIMARY...",
        domain,
        snapshot.name()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let clusterset_id = Uuid::new_v4();
        md.clustersets.push(ClusterSetRecord {
            clusterset_id,
            domain_name: domain.to_string(),
            primary_cluster: cluster_id,
            members: vec![ClusterSetMemberRecord {
                cluster_id,
                invalidated: false,
                options: BTreeMap::new(),
                applied_options: BTreeMap::new(),
                replication_account: None,
            }],
        });
        if let Some(cluster) = md.cluster_mut(&cluster_id) {
            cluster.clusterset_id = Some(clusterset_id);
        }
        metadata::store(changes, &primary, &mut md)
    })?;

    if !options.dry_run {
        output.info(format!(
            "ClusterSet '{}' successfully created. Use createReplicaCluster to add replica clusters.",
            domain
        ));
    }
    Ok(ClusterSetHandle::new(primary))
}

/// Create a replica cluster seeded on the standalone `address`.
///
/// Options are validated before anything is touched; a failure after the
/// first remote change reverts every change made so far.
pub fn create_replica_cluster(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    address: &InstanceAddress,
    name: &str,
    options: CreateReplicaClusterOptions,
) -> AdminResult<ClusterHandle> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "CREATE_REPLICA_CLUSTER",
        &[("cluster", name), ("instance", target_text.as_str())],
    );
    let result = create_replica(ctx, handle, address, name, &options);
    scope.finish(&result);
    result
}

fn create_replica(
    ctx: &AdminContext,
    handle: &ClusterSetHandle,
    address: &InstanceAddress,
    name: &str,
    options: &CreateReplicaClusterOptions,
) -> AdminResult<ClusterHandle> {
    validate_cluster_name(name)?;
    options.validate()?;

    let view = ClusterSetView::load(ctx, handle)?;
    let writer = view.require_writer(ctx, "createReplicaCluster")?;
    if view.metadata.cluster_by_name(name).is_some() {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!("A cluster named '{}' already exists in the ClusterSet.", name),
        ));
    }
    let primary_cluster = view.primary_cluster()?.clone();
    check_member_subject(primary_cluster.member_auth_type, None)?;

    let target = TargetInstance::inspect(ctx, address)?;
    target.ensure_standalone(&view.metadata, name)?;

    let primary_snapshot = view.snapshot(ctx, &primary_cluster.cluster_id)?;
    let provisioning = plan_provisioning(
        ctx,
        &primary_snapshot,
        &target,
        options.recovery_method(),
        "createReplicaCluster",
    )?;
    let source = InboundSource::of(ctx, &view.metadata, &primary_cluster.cluster_id).ok_or_else(|| {
        AdminError::internal("The PRIMARY cluster has no writable member to replicate from.")
    })?;
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let progress = options.recovery_progress.unwrap_or(2);
    let channel_options = options.channel.to_map();

    let mut cluster = new_cluster_record(
        name,
        derive_group_name(&target.identity.server_uuid),
        TopologyMode::SinglePrimary,
        primary_cluster.ssl_mode,
        primary_cluster.member_auth_type,
        primary_cluster.cert_issuer.clone(),
        primary_cluster.disable_clone,
    );
    cluster.clusterset_id = Some(view.clusterset.clusterset_id);
    if let Some(stack) = primary_cluster.attributes.get(COMMUNICATION_STACK_ATTRIBUTE) {
        cluster
            .attributes
            .insert(COMMUNICATION_STACK_ATTRIBUTE.to_string(), stack.clone());
    }

    let output = ctx.output();
    output.info(format!(
        "Setting up replica cluster '{}' of ClusterSet '{}' on '{}' (recoveryMethod={}).",
        name,
        view.domain_name(),
        address,
        provisioning.method.as_str()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let recovery_user = cluster_account(target.identity.server_id);
        let recovery = account_spec(recovery_user.clone(), &cluster, None);
        create_account(changes, &writer, &recovery)?;
        let channel_user = clusterset_account(target.identity.server_id);
        let channel_account = refresh_channel_account(changes, &writer, &cluster, &channel_user, None)?;

        if provisioning.method == RecoveryMethod::Clone {
            clone_from(changes, address, &provisioning.donor, progress)?;
        }
        configure_member(changes, address, &cluster, true, &[address.clone()])?;
        set_recovery_account(changes, address, &recovery_user, recovery.password.clone())?;
        start_member(changes, address, true)?;
        fence(changes, address)?;

        start_inbound_channel(changes, address, &source, &channel_account, &channel_options)?;
        if !changes.is_dry_run() {
            sync_with(ctx, address, &writer, timeout)?;
        }

        let mut md = metadata::load(ctx, &writer)?;
        md.instances.push(InstanceRecord {
            cluster_id: cluster.cluster_id,
            address: address.clone(),
            server_uuid: target.identity.server_uuid,
            server_id: target.identity.server_id,
            label: address.to_string(),
            cert_subject: None,
            replication_account: Some(recovery_user),
            read_replica: None,
            joined_at: Utc::now(),
        });
        md.clusters.push(cluster.clone());
        let cs = md
            .clusterset_mut(&view.clusterset.clusterset_id)
            .ok_or_else(|| AdminError::internal("The ClusterSet record disappeared from the metadata."))?;
        cs.members.push(ClusterSetMemberRecord {
            cluster_id: cluster.cluster_id,
            invalidated: false,
            options: channel_options.clone(),
            applied_options: channel_options.clone(),
            replication_account: Some(channel_user),
        });
        metadata::store(changes, &writer, &mut md)?;

        if !changes.is_dry_run() {
            sync_with(ctx, address, &writer, timeout)?;
        }
        Ok(())
    })?;

    if !options.dry_run {
        log_event(
            Event::ReplicaClusterCreated,
            &[("cluster", name), ("instance", address.to_string().as_str())],
        );
        output.info(format!(
            "Replica cluster '{}' successfully created on ClusterSet '{}'.",
            name,
            view.domain_name()
        ));
    }
    Ok(ClusterHandle::new(name, address.clone()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fixtures::Lab;
    use crate::gateway::CLUSTERSET_CHANNEL;

    #[test]
    fn test_create_clusterset_records_primary() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();

        let md = lab.metadata();
        let cs = &md.clustersets[0];
        assert_eq!(cs.domain_name, "world");
        assert_eq!(md.cluster_by_name("prod").unwrap().clusterset_id, Some(cs.clusterset_id));
        assert_eq!(cs.members.len(), 1);
        assert!(lab.ctx.output().contains("successfully created"));
    }

    #[test]
    fn test_cluster_cannot_join_two_sets() {
        let lab = Lab::cluster("prod", &[3310]);
        create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let err = create_cluster_set(&lab.ctx, &lab.handle, "other", CreateClusterSetOptions::default())
            .unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidState);
    }

    #[test]
    fn test_replica_cluster_replicates_and_is_fenced() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let seed = lab.spare(4410);
        create_replica_cluster(&lab.ctx, &cs, &seed, "dr", CreateReplicaClusterOptions::default()).unwrap();

        assert_eq!(
            lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL),
            Some(lab.members[0].clone())
        );
        let md = lab.metadata_on(&seed);
        let dr = md.cluster_by_name("dr").unwrap();
        assert!(md.is_replica_cluster(&dr.cluster_id));
        let member = md.clustersets[0].member(&dr.cluster_id).unwrap();
        assert_eq!(member.replication_account.as_deref(), Some("mysql_innodb_cs_3"));

        lab.fleet.write_transactions(&lab.members[0], 4).unwrap();
        assert_eq!(lab.fleet.gtid_executed(&seed), lab.fleet.gtid_executed(&lab.members[0]));
    }

    #[test]
    fn test_invalid_channel_option_touches_nothing() {
        let lab = Lab::cluster("prod", &[3310]);
        let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let seed = lab.spare(4410);
        let options = CreateReplicaClusterOptions::from_json(Some(&json!({
            "clusterSetReplicationZstdCompressionLevel": 999
        })));
        assert!(options.is_err());

        let bad = CreateReplicaClusterOptions {
            channel: serde_json::from_value(json!({"clusterSetReplicationZstdCompressionLevel": 999}))
                .unwrap(),
            ..CreateReplicaClusterOptions::default()
        };
        let err = create_replica_cluster(&lab.ctx, &cs, &seed, "dr", bad).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidArgument);
        assert!(lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL).is_none());
        assert!(lab.metadata().cluster_by_name("dr").is_none());
    }

    #[test]
    fn test_failed_channel_start_is_reverted() {
        let lab = Lab::cluster("prod", &[3310]);
        let cs = create_cluster_set(&lab.ctx, &lab.handle, "world", CreateClusterSetOptions::default()).unwrap();
        let seed = lab.spare(4410);
        lab.fleet.fail_next(&seed, "START_REPLICA").unwrap();
        let err = create_replica_cluster(&lab.ctx, &cs, &seed, "dr", CreateReplicaClusterOptions::default());
        assert!(err.is_err());

        assert!(lab.fleet.channel_source(&seed, CLUSTERSET_CHANNEL).is_none());
        assert!(lab.metadata().cluster_by_name("dr").is_none());
        assert!(!lab
            .fleet
            .accounts(&lab.members[0])
            .iter()
            .any(|(user, _)| user.starts_with("mysql_innodb_cs_")));

        create_replica_cluster(&lab.ctx, &cs, &seed, "dr", CreateReplicaClusterOptions::default()).unwrap();
        assert!(lab.metadata().cluster_by_name("dr").is_some());
    }
}
