//! addInstance

use chrono::Utc;

use super::accounts::{account_spec, cluster_account, create_account};
use super::auth::check_member_subject;
use super::join::{clone_from, configure_member, set_recovery_account, start_member, update_seeds};
use super::provisioning::{select_method, ProvisioningInput};
use super::target::TargetInstance;
use crate::changes::run_reverting;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::AdminResult;
use crate::gateway::GtidSet;
use crate::metadata::{self, InstanceRecord};
use crate::observability::ObservationScope;
use crate::options::{timeout_from_secs, AddInstanceOptions};
use crate::quorum::{check_label_unique, gtid_state, wait_for_sync, ClusterSnapshot};
use crate::topology::{validate_label, InstanceAddress, MemberRole, RecoveryMethod};

/// How a joiner gets its data, and from where.
#[derive(Debug, Clone)]
pub(crate) struct ProvisioningPlan {
    pub method: RecoveryMethod,
    pub donor: InstanceAddress,
    /// What the joiner must have applied once it is done.
    pub source_executed: GtidSet,
}

/// Choose a provisioning method for `target` joining the snapshot's cluster.
///
/// The clone donor is an ONLINE secondary when there is one, the primary
/// otherwise.
pub(crate) fn plan_provisioning(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    target: &TargetInstance,
    requested: RecoveryMethod,
    operation: &str,
) -> AdminResult<ProvisioningPlan> {
    let primary = snapshot.require_primary(operation)?;
    let (source_executed, _) = gtid_state(ctx, &primary)?;

    let online: Vec<_> = snapshot
        .online_members()
        .into_iter()
        .filter(|m| *m.address() != target.address)
        .collect();
    let donor_purged: Vec<GtidSet> = online
        .iter()
        .filter_map(|m| gtid_state(ctx, m.address()).ok().map(|(_, purged)| purged))
        .collect();
    let donors_clone = online
        .iter()
        .any(|m| m.version.map(|v| v.supports_clone()).unwrap_or(true));
    let clone_available =
        !snapshot.cluster.disable_clone && target.version().supports_clone() && donors_clone;

    let method = select_method(
        ctx,
        &ProvisioningInput {
            target: &target.address,
            requested,
            target_executed: &target.executed,
            source_executed: &source_executed,
            donor_purged,
            clone_available,
        },
    )?;
    let donor = online
        .iter()
        .find(|m| m.role == Some(MemberRole::Secondary))
        .map(|m| m.address().clone())
        .unwrap_or(primary);
    Ok(ProvisioningPlan {
        method,
        donor,
        source_executed,
    })
}

pub fn add_instance(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    options: AddInstanceOptions,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "ADD_INSTANCE",
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
    options: &AddInstanceOptions,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    snapshot.require_quorum("addInstance")?;
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

    let plan = plan_provisioning(ctx, &snapshot, &target, options.recovery_method(), "addInstance")?;
    let (writer, mut md) = snapshot.metadata_writer(ctx, "addInstance")?;
    let single_primary = snapshot.topology_mode().is_single_primary();
    let timeout = timeout_from_secs(options.timeout).or(ctx.settings().default_sync_timeout);
    let progress = options.recovery_progress.unwrap_or(2);

    let mut seeds: Vec<InstanceAddress> = snapshot
        .members
        .iter()
        .map(|m| m.address().clone())
        .collect();
    seeds.push(address.clone());
    let mut reachable: Vec<InstanceAddress> = snapshot
        .online_members()
        .iter()
        .map(|m| m.address().clone())
        .collect();
    reachable.push(address.clone());

    let output = ctx.output();
    output.info(format!(
        "Adding instance '{}' to cluster '{}' using recoveryMethod={}.",
        address,
        cluster.name,
        plan.method.as_str()
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let user = cluster_account(target.identity.server_id);
        let spec = account_spec(user.clone(), &cluster, options.cert_subject.as_deref());
        create_account(changes, &writer, &spec)?;
        if plan.method == RecoveryMethod::Clone {
            clone_from(changes, address, &plan.donor, progress)?;
        }
        configure_member(changes, address, &cluster, single_primary, &seeds)?;
        set_recovery_account(changes, address, &user, spec.password.clone())?;
        start_member(changes, address, false)?;
        if !changes.is_dry_run() {
            wait_for_sync(ctx, address, &plan.source_executed, timeout)?;
        }

        md.instances.push(InstanceRecord {
            cluster_id: cluster.cluster_id,
            address: address.clone(),
            server_uuid: target.identity.server_uuid,
            server_id: target.identity.server_id,
            label: label.clone(),
            cert_subject: options.cert_subject.clone(),
            replication_account: Some(user),
            read_replica: None,
            joined_at: Utc::now(),
        });
        metadata::store(changes, &writer, &mut md)?;
        update_seeds(changes, &reachable)
    })?;

    if !options.dry_run {
        output.info(format!(
            "The instance '{}' was successfully added to the cluster.",
            address
        ));
    }
    Ok(())
}
