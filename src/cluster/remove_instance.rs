//! removeInstance

use super::accounts::drop_account;
use super::join::update_seeds;
use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::Statement;
use crate::metadata;
use crate::observability::{log_event, Event, ObservationScope};
use crate::options::{timeout_from_secs, RemoveInstanceOptions};
use crate::quorum::{check_appliers, sync_with, ClusterSnapshot, MemberStatus};
use crate::replica;
use crate::topology::{InstanceAddress, MemberState};

pub fn remove_instance(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: RemoveInstanceOptions,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "REMOVE_INSTANCE",
        &[("cluster", handle.name.as_str()), ("instance", target_text.as_str())],
    );
    let result = remove(ctx, handle, address, &options);
    scope.finish(&result);
    result
}

/// Whether to go on without the member: `force`, or an operator's yes.
pub(crate) fn confirm_unreachable(ctx: &AdminContext, address: &InstanceAddress, force: Option<bool>) -> bool {
    match force {
        Some(force) => force,
        None => {
            let console = ctx.console();
            console.is_interactive()
                && console.confirm(&format!(
                    "The instance '{}' is not reachable. Remove it from the cluster metadata anyway?",
                    address
                ))
        }
    }
}

fn unreachable_error(status: &MemberStatus) -> AdminError {
    let mut error = AdminError::new(
        AdminErrorKind::Connectivity,
        format!(
            "The instance '{}' is not reachable and cannot be safely removed from the cluster. \
             Use the 'force' option to remove it from the metadata only.",
            status.address()
        ),
    );
    if let Some(cause) = status.error.as_ref().and_then(|e| e.cause.clone()) {
        error = error.with_cause(cause);
    }
    error
}

fn remove(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: &RemoveInstanceOptions,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let record = snapshot
        .metadata
        .instance(address)
        .filter(|r| r.cluster_id == snapshot.cluster_id())
        .cloned()
        .ok_or_else(|| AdminError::not_member(address, snapshot.name()))?;
    if record.is_read_replica() {
        return replica::remove_read_replica(ctx, &snapshot, &record, options);
    }

    let primary = snapshot.require_primary("removeInstance")?;
    if snapshot.members.len() == 1 {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "The instance '{}' is the last member of cluster '{}'. Use dissolve to remove the cluster.",
                address,
                snapshot.name()
            ),
        ));
    }
    let status = snapshot
        .member(address)
        .ok_or_else(|| AdminError::not_member(address, snapshot.name()))?;
    let force = options.force.unwrap_or(false);
    let output = ctx.output();
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);

    let reachable = status.reachable && status.state != MemberState::Missing;
    if !reachable {
        if !confirm_unreachable(ctx, address, options.force) {
            return Err(unreachable_error(status));
        }
        output.warning(format!(
            "The instance '{}' is not reachable; it will only be removed from the metadata. \
             Stop group replication on it manually before it is restarted.",
            address
        ));
    } else {
        if let Err(e) = check_appliers(ctx, address) {
            if !force {
                return Err(e);
            }
            output.warning(format!("{} Removing the instance anyway (force).", e.message));
        }
        if status.state == MemberState::Online && *address != primary {
            output.info("The instance will be synchronized with the cluster before it leaves.");
            if let Err(e) = sync_with(ctx, address, &primary, timeout) {
                if !force {
                    return Err(e);
                }
                output.warning(format!(
                    "{} Transactions not applied on '{}' are lost for it (force).",
                    e.message, address
                ));
            }
        }
    }

    let (writer, mut md) = snapshot.metadata_writer(ctx, "removeInstance")?;
    let remaining: Vec<InstanceAddress> = snapshot
        .online_members()
        .iter()
        .map(|m| m.address().clone())
        .filter(|a| a != address)
        .collect();

    run_reverting(ctx, options.dry_run, |changes| {
        let previous = md.to_document()?;
        md.remove_instance(address);
        metadata::store(changes, &writer, &mut md)?;
        changes.on_revert(&writer, Statement::StoreMetadata { document: previous });

        if let Some(ref user) = record.replication_account {
            drop_account(changes, &writer, user)?;
        }
        if reachable {
            changes.apply(
                address,
                Statement::set_persist("group_replication_start_on_boot", "OFF"),
            )?;
            changes.apply(address, Statement::StopGroupReplication)?;
        }
        update_seeds(changes, &remaining)
    })?;

    if !options.dry_run {
        log_event(
            Event::MemberRemoved,
            &[
                ("cluster", snapshot.name()),
                ("instance", address.to_string().as_str()),
                ("metadata_only", if reachable { "false" } else { "true" }),
            ],
        );
        output.info(format!(
            "The instance '{}' was successfully removed from the cluster.",
            address
        ));
    }
    Ok(())
}
