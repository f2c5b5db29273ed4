//! Primary handover and topology mode switches.

use uuid::Uuid;

use crate::changes::{run_reverting, ChangeSet};
use crate::clusterset;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::Statement;
use crate::metadata;
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::SetPrimaryInstanceOptions;
use crate::quorum::{cluster_primary, ClusterSnapshot};
use crate::replica;
use crate::topology::{InstanceAddress, TopologyMode};

/// UUID of a group member that may take the primary role.
fn eligible_member(snapshot: &ClusterSnapshot, address: &InstanceAddress) -> AdminResult<Uuid> {
    let record = snapshot
        .metadata
        .instance(address)
        .filter(|r| r.cluster_id == snapshot.cluster_id())
        .ok_or_else(|| AdminError::not_member(address, snapshot.name()))?;
    if record.is_read_replica() {
        return Err(AdminError::argument(format!(
            "The instance '{}' is a Read-Replica and cannot become a primary.",
            address
        )));
    }
    match snapshot.member(address) {
        Some(status) if status.is_online() => Ok(record.server_uuid),
        Some(status) => Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "The instance '{}' is {}; only ONLINE members can become primary.",
                address,
                status.state.as_str()
            ),
        )),
        None => Err(AdminError::not_member(address, snapshot.name())),
    }
}

/// Fresh snapshot of the cluster after a live change, for follow-up steps.
fn reload(ctx: &AdminContext, snapshot: &ClusterSnapshot) -> AdminResult<ClusterSnapshot> {
    ClusterSnapshot::of_cluster(ctx, &snapshot.metadata, &snapshot.cluster_id())
}

/// Record the topology mode in the metadata through the writable member.
fn store_mode(
    changes: &mut ChangeSet<'_>,
    snapshot: &ClusterSnapshot,
    mode: TopologyMode,
    fallback_writer: &InstanceAddress,
) -> AdminResult<()> {
    let ctx = changes.ctx();
    let writer = if changes.is_dry_run() {
        fallback_writer.clone()
    } else {
        cluster_primary(ctx, &snapshot.metadata, &snapshot.cluster_id())
            .unwrap_or_else(|| fallback_writer.clone())
    };
    let mut md = metadata::load(ctx, &writer)?;
    if let Some(cluster) = md.cluster_mut(&snapshot.cluster_id()) {
        cluster.topology_mode = mode;
    }
    metadata::store(changes, &writer, &mut md)
}

fn refresh_read_replicas(changes: &mut ChangeSet<'_>, snapshot: &ClusterSnapshot) -> AdminResult<()> {
    if snapshot.read_replicas().is_empty() {
        return Ok(());
    }
    if changes.is_dry_run() {
        changes
            .ctx()
            .output()
            .note("Read-Replicas will be reconfigured to follow the new topology.");
        return Ok(());
    }
    let fresh = reload(changes.ctx(), snapshot)?;
    replica::reconcile_read_replicas(changes, &fresh)
}

pub fn set_primary_instance(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: SetPrimaryInstanceOptions,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "SET_PRIMARY_INSTANCE",
        &[("cluster", handle.name.as_str()), ("instance", target_text.as_str())],
    );
    let result = set_primary(ctx, handle, address, &options);
    scope.finish(&result);
    result
}

fn set_primary(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: &SetPrimaryInstanceOptions,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let current = snapshot.require_primary("setPrimaryInstance")?;
    if !snapshot.topology_mode().is_single_primary() {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' is running in multi-primary mode; there is no primary to change.",
                snapshot.name()
            ),
        ));
    }
    let uuid = eligible_member(&snapshot, address)?;
    let output = ctx.output();
    if current == *address {
        output.note(format!("The instance '{}' is already the primary.", address));
        return Ok(());
    }
    if let Some(secs) = options.running_transactions_timeout {
        output.info(format!(
            "Transactions running on '{}' get {}s to complete before the handover.",
            current, secs
        ));
    }

    run_reverting(ctx, options.dry_run, |changes| {
        changes.apply_reversible(
            &current,
            Statement::SetPrimary { server_uuid: uuid },
            Statement::SetPrimary {
                server_uuid: snapshot
                    .metadata
                    .instance(&current)
                    .map(|r| r.server_uuid)
                    .unwrap_or(uuid),
            },
        )?;
        if snapshot.is_replica_cluster() {
            clusterset::relocate_inbound_channel(changes, &snapshot.metadata, &snapshot.cluster_id(), &current, address)?;
        }
        refresh_read_replicas(changes, &snapshot)
    })?;

    if !options.dry_run {
        log_event(
            Event::PrimaryChanged,
            &[
                ("cluster", snapshot.name()),
                ("from", current.to_string().as_str()),
                ("to", address.to_string().as_str()),
            ],
        );
        output.info(format!(
            "The instance '{}' was successfully elected as primary.",
            address
        ));
    }
    Ok(())
}

pub fn switch_to_single_primary_mode(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    primary: Option<&InstanceAddress>,
) -> AdminResult<()> {
    let scope = ObservationScope::with_fields(
        "SWITCH_TO_SINGLE_PRIMARY",
        &[("cluster", handle.name.as_str())],
    );
    let result = to_single(ctx, handle, primary);
    scope.finish(&result);
    result
}

fn to_single(ctx: &AdminContext, handle: &ClusterHandle, primary: Option<&InstanceAddress>) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let view = snapshot.require_quorum("switchToSinglePrimaryMode")?;
    let output = ctx.output();
    if view.single_primary {
        output.note(format!(
            "Cluster '{}' is already running in single-primary mode.",
            snapshot.name()
        ));
        return Ok(());
    }
    let uuid = primary.map(|p| eligible_member(&snapshot, p)).transpose()?;
    let executor = snapshot.require_primary("switchToSinglePrimaryMode")?;

    run_reverting(ctx, false, |changes| {
        changes.apply(&executor, Statement::SwitchToSinglePrimary { server_uuid: uuid })?;
        changes.on_revert(&executor, Statement::SwitchToMultiPrimary);
        store_mode(changes, &snapshot, TopologyMode::SinglePrimary, &executor)?;
        refresh_read_replicas(changes, &snapshot)
    })?;

    log_event(
        Event::ModeSwitched,
        &[("cluster", snapshot.name()), ("mode", TopologyMode::SinglePrimary.as_str())],
    );
    output.info(format!(
        "The cluster '{}' was switched to single-primary mode.",
        snapshot.name()
    ));
    Ok(())
}

pub fn switch_to_multi_primary_mode(ctx: &AdminContext, handle: &ClusterHandle) -> AdminResult<()> {
    let scope = ObservationScope::with_fields(
        "SWITCH_TO_MULTI_PRIMARY",
        &[("cluster", handle.name.as_str())],
    );
    let result = to_multi(ctx, handle);
    scope.finish(&result);
    result
}

fn to_multi(ctx: &AdminContext, handle: &ClusterHandle) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    if snapshot.clusterset().is_some() {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "Cluster '{}' belongs to a ClusterSet; multi-primary mode is not supported there.",
                snapshot.name()
            ),
        ));
    }
    let view = snapshot.require_quorum("switchToMultiPrimaryMode")?;
    let output = ctx.output();
    if !view.single_primary {
        output.note(format!(
            "Cluster '{}' is already running in multi-primary mode.",
            snapshot.name()
        ));
        return Ok(());
    }
    let executor = snapshot.require_primary("switchToMultiPrimaryMode")?;

    run_reverting(ctx, false, |changes| {
        changes.apply(&executor, Statement::SwitchToMultiPrimary)?;
        changes.on_revert(
            &executor,
            Statement::SwitchToSinglePrimary { server_uuid: None },
        );
        store_mode(changes, &snapshot, TopologyMode::MultiPrimary, &executor)?;
        refresh_read_replicas(changes, &snapshot)
    })?;

    log_event(
        Event::ModeSwitched,
        &[("cluster", snapshot.name()), ("mode", TopologyMode::MultiPrimary.as_str())],
    );
    output.info(format!(
        "The cluster '{}' was switched to multi-primary mode.",
        snapshot.name()
    ));
    Ok(())
}
