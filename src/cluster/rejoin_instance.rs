//! rejoinInstance

use super::accounts::{account_spec, cluster_account, create_account};
use super::add_instance::plan_provisioning;
use super::join::{clone_from, configure_member, set_recovery_account, start_member, update_seeds};
use super::target::TargetInstance;
use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::Statement;
use crate::metadata;
use crate::observability::ObservationScope;
use crate::options::{timeout_from_secs, RejoinInstanceOptions};
use crate::quorum::{check_identity_unique, wait_for_sync, ClusterSnapshot};
use crate::replica;
use crate::topology::{InstanceAddress, MemberState, RecoveryMethod};

pub fn rejoin_instance(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: RejoinInstanceOptions,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "REJOIN_INSTANCE",
        &[("cluster", handle.name.as_str()), ("instance", target_text.as_str())],
    );
    let result = rejoin(ctx, handle, address, &options);
    scope.finish(&result);
    result
}

fn rejoin(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: &RejoinInstanceOptions,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let record = snapshot
        .metadata
        .instance(address)
        .filter(|r| r.cluster_id == snapshot.cluster_id())
        .cloned()
        .ok_or_else(|| AdminError::not_member(address, snapshot.name()))?;
    if record.is_read_replica() {
        return replica::rejoin_read_replica(ctx, &snapshot, &record, options);
    }
    snapshot.require_quorum("rejoinInstance")?;
    let cluster = snapshot.cluster.clone();
    let output = ctx.output();

    if let Some(status) = snapshot.member(address) {
        if matches!(status.state, MemberState::Online | MemberState::Recovering) {
            output.note(format!(
                "The instance '{}' is already an active member of cluster '{}'.",
                address, cluster.name
            ));
            return Ok(());
        }
    }

    let target = TargetInstance::inspect(ctx, address)?;
    if target.group.running && target.group.group_name != Some(cluster.group_name) {
        return Err(AdminError::precondition(
            AdminErrorKind::NotStandalone,
            format!(
                "The instance '{}' is running group replication for a different group.",
                address
            ),
        ));
    }
    check_identity_unique(&snapshot.metadata, address, &target.identity)?;

    let requested = options.recovery_method.unwrap_or(RecoveryMethod::Auto);
    let plan = plan_provisioning(ctx, &snapshot, &target, requested, "rejoinInstance")?;
    let (writer, mut md) = snapshot.metadata_writer(ctx, "rejoinInstance")?;
    let single_primary = snapshot.topology_mode().is_single_primary();
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let seeds: Vec<InstanceAddress> = snapshot.members.iter().map(|m| m.address().clone()).collect();
    let mut active: Vec<InstanceAddress> = snapshot
        .online_members()
        .iter()
        .map(|m| m.address().clone())
        .collect();
    active.push(address.clone());

    output.info(format!(
        "Rejoining instance '{}' to cluster '{}'...",
        address, cluster.name
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        if target.group.running {
            changes.apply(address, Statement::StopGroupReplication)?;
        }
        if plan.method == RecoveryMethod::Clone {
            clone_from(changes, address, &plan.donor, 2)?;
        }
        let user = record
            .replication_account
            .clone()
            .unwrap_or_else(|| cluster_account(target.identity.server_id));
        let spec = account_spec(user.clone(), &cluster, record.cert_subject.as_deref());
        create_account(changes, &writer, &spec)?;
        configure_member(changes, address, &cluster, single_primary, &seeds)?;
        set_recovery_account(changes, address, &user, spec.password.clone())?;
        start_member(changes, address, false)?;
        if !changes.is_dry_run() {
            wait_for_sync(ctx, address, &plan.source_executed, timeout)?;
        }
        if record.replication_account.is_none() {
            if let Some(entry) = md.instance_mut(address) {
                entry.replication_account = Some(user);
            }
            metadata::store(changes, &writer, &mut md)?;
        }
        update_seeds(changes, &active)
    })?;

    if !options.dry_run {
        output.info(format!(
            "The instance '{}' was successfully rejoined to the cluster.",
            address
        ));
    }
    Ok(())
}
