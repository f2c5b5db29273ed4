//! createCluster
//!
//! Bootstraps a new group on a standalone seed, or registers a group that
//! is already running (`adoptFromGR`).

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::accounts::{account_spec, cluster_account, create_account};
use super::auth::resolve_create_auth;
use super::join::{configure_member, set_recovery_account, start_member, COMMUNICATION_STACK_ATTRIBUTE};
use super::target::TargetInstance;
use crate::changes::{run_reverting, ChangeSet};
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::ServerVersion;
use crate::metadata::{self, ClusterRecord, InstanceRecord, TopologyMetadata};
use crate::observability::ObservationScope;
use crate::options::CreateClusterOptions;
use crate::quorum::{observe, server_identity};
use crate::topology::{validate_cluster_name, InstanceAddress, MemberAuthType, SslMode, TopologyMode};

/// Mixed into the seed's server UUID to derive a group name.
const GROUP_NAME_SALT: u128 = 0x5a17_c3d2_9e4b_41f0_8b6a_d0c1_7e25_93af;

/// Group name derived from the seed, stable across dry runs.
pub fn derive_group_name(seed_uuid: &Uuid) -> Uuid {
    Uuid::from_u128(seed_uuid.as_u128() ^ GROUP_NAME_SALT)
}

pub fn create_cluster(
    ctx: &AdminContext,
    seed: &InstanceAddress,
    name: &str,
    options: CreateClusterOptions,
) -> AdminResult<ClusterHandle> {
    let seed_text = seed.to_string();
    let scope = ObservationScope::with_fields(
        "CREATE_CLUSTER",
        &[("cluster", name), ("instance", seed_text.as_str())],
    );
    let result = if options.adopt_from_gr {
        adopt(ctx, seed, name, &options)
    } else {
        bootstrap(ctx, seed, name, &options)
    };
    scope.finish(&result);
    result
}

pub(crate) fn new_cluster_record(
    name: &str,
    group_name: Uuid,
    mode: TopologyMode,
    ssl_mode: SslMode,
    auth: MemberAuthType,
    cert_issuer: Option<String>,
    disable_clone: bool,
) -> ClusterRecord {
    ClusterRecord {
        cluster_id: Uuid::new_v4(),
        name: name.to_string(),
        group_name,
        topology_mode: mode,
        ssl_mode,
        member_auth_type: auth,
        cert_issuer,
        disable_clone,
        clusterset_id: None,
        created_at: Utc::now(),
        attributes: BTreeMap::new(),
    }
}

fn confirm_multi_primary(ctx: &AdminContext, options: &CreateClusterOptions) -> AdminResult<()> {
    if !options.multi_primary || options.force {
        return Ok(());
    }
    let console = ctx.console();
    let question = "The cluster will be created in multi-primary mode. Concurrent writes to the \
                    same rows on different members are resolved by rollback. Proceed?";
    if console.is_interactive() && console.confirm(question) {
        return Ok(());
    }
    Err(AdminError::precondition(
        AdminErrorKind::Aborted,
        "Use of multiPrimary mode is not recommended unless you understand the limitations. \
         Use the 'force' option to confirm.",
    ))
}

fn resolve_stack(options: &CreateClusterOptions, version: ServerVersion) -> AdminResult<String> {
    match options.communication_stack.as_deref().map(str::to_ascii_uppercase) {
        Some(stack) if stack == "MYSQL" && !version.supports_mysql_communication_stack() => {
            Err(AdminError::precondition(
                AdminErrorKind::IncompatibleVersion,
                format!(
                    "The MYSQL communication stack requires server version {} or newer.",
                    ServerVersion::MYSQL_COMMUNICATION_STACK
                ),
            ))
        }
        Some(stack) => Ok(stack),
        None if version.supports_mysql_communication_stack() => Ok("MYSQL".to_string()),
        None => Ok("XCOM".to_string()),
    }
}

fn bootstrap(
    ctx: &AdminContext,
    seed: &InstanceAddress,
    name: &str,
    options: &CreateClusterOptions,
) -> AdminResult<ClusterHandle> {
    validate_cluster_name(name)?;
    let (auth, ssl_mode, cert_issuer) = resolve_create_auth(options)?;
    let target = TargetInstance::inspect(ctx, seed)?;
    target.ensure_standalone(&TopologyMetadata::new(), name)?;
    confirm_multi_primary(ctx, options)?;
    let stack = resolve_stack(options, target.version())?;

    let group_name = options
        .group_name
        .unwrap_or_else(|| derive_group_name(&target.identity.server_uuid));
    let mode = if options.multi_primary {
        TopologyMode::MultiPrimary
    } else {
        TopologyMode::SinglePrimary
    };
    let mut cluster = new_cluster_record(
        name,
        group_name,
        mode,
        ssl_mode,
        auth,
        cert_issuer,
        options.disable_clone,
    );
    cluster
        .attributes
        .insert(COMMUNICATION_STACK_ATTRIBUTE.to_string(), Value::from(stack));

    let output = ctx.output();
    output.info(format!("Creating cluster '{}' on '{}'...", name, seed));

    run_reverting(ctx, options.dry_run, |changes| {
        let user = cluster_account(target.identity.server_id);
        let spec = account_spec(user.clone(), &cluster, options.cert_subject.as_deref());
        create_account(changes, seed, &spec)?;
        configure_member(changes, seed, &cluster, !options.multi_primary, &[seed.clone()])?;
        set_recovery_account(changes, seed, &user, spec.password.clone())?;
        start_member(changes, seed, true)?;

        let mut md = TopologyMetadata::new();
        md.instances.push(InstanceRecord {
            cluster_id: cluster.cluster_id,
            address: seed.clone(),
            server_uuid: target.identity.server_uuid,
            server_id: target.identity.server_id,
            label: seed.to_string(),
            cert_subject: options.cert_subject.clone(),
            replication_account: Some(user),
            read_replica: None,
            joined_at: Utc::now(),
        });
        md.clusters.push(cluster.clone());
        metadata::store(changes, seed, &mut md)
    })?;

    if !options.dry_run {
        output.info(format!(
            "Cluster '{}' successfully created. Use addInstance to add instances to it.",
            name
        ));
    }
    Ok(ClusterHandle::new(name, seed.clone()))
}

fn adopt(
    ctx: &AdminContext,
    seed: &InstanceAddress,
    name: &str,
    options: &CreateClusterOptions,
) -> AdminResult<ClusterHandle> {
    validate_cluster_name(name)?;
    resolve_create_auth(options)?;
    if metadata::read_from(ctx, seed)?.is_some() {
        return Err(AdminError::precondition(
            AdminErrorKind::NotStandalone,
            format!(
                "The instance '{}' already holds topology metadata; it belongs to an existing cluster.",
                seed
            ),
        ));
    }
    let view = observe(ctx, seed)?.ok_or_else(|| {
        AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "The adoptFromGR option requires '{}' to be an active member of a running group.",
                seed
            ),
        )
    })?;
    if !view.has_quorum() {
        return Err(AdminError::no_quorum(name, "createCluster"));
    }
    let group_name = view.group_name.ok_or_else(|| {
        AdminError::internal(format!("The group of '{}' reports no group name.", seed))
    })?;
    let writer = view
        .primary()
        .map(|m| m.address.clone())
        .ok_or_else(|| AdminError::internal("The adopted group has no writable member."))?;

    let mut cluster = new_cluster_record(
        name,
        group_name,
        view.topology_mode(),
        SslMode::default(),
        MemberAuthType::Password,
        None,
        options.disable_clone,
    );
    cluster
        .attributes
        .insert("adopted".to_string(), Value::Bool(true));
    cluster.attributes.insert(
        COMMUNICATION_STACK_ATTRIBUTE.to_string(),
        Value::from(view.communication_stack.clone()),
    );

    let output = ctx.output();
    output.info(format!(
        "Creating cluster '{}' from the existing group of '{}'...",
        name, seed
    ));

    run_reverting(ctx, options.dry_run, |changes| {
        let mut md = TopologyMetadata::new();
        for member in view.online() {
            let identity = server_identity(ctx, &member.address)?;
            let user = cluster_account(identity.server_id);
            adopt_member_account(changes, &writer, &member.address, &user, &cluster)?;
            output.info(format!("Adding instance '{}'.", member.address));
            md.instances.push(InstanceRecord {
                cluster_id: cluster.cluster_id,
                address: member.address.clone(),
                server_uuid: identity.server_uuid,
                server_id: identity.server_id,
                label: member.address.to_string(),
                cert_subject: None,
                replication_account: Some(user),
                read_replica: None,
                joined_at: Utc::now(),
            });
        }
        md.clusters.push(cluster.clone());
        metadata::store(changes, &writer, &mut md)
    })?;

    if !options.dry_run {
        output.info(format!("Cluster '{}' successfully created.", name));
    }
    Ok(ClusterHandle::new(name, seed.clone()))
}

fn adopt_member_account(
    changes: &mut ChangeSet<'_>,
    writer: &InstanceAddress,
    member: &InstanceAddress,
    user: &str,
    cluster: &ClusterRecord,
) -> AdminResult<()> {
    let spec = account_spec(user.to_string(), cluster, None);
    create_account(changes, writer, &spec)?;
    set_recovery_account(changes, member, user, spec.password.clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::SimFleet;

    #[test]
    fn test_derived_group_name_is_stable() {
        let seed = Uuid::new_v4();
        assert_eq!(derive_group_name(&seed), derive_group_name(&seed));
        assert_ne!(derive_group_name(&seed), seed);
    }

    #[test]
    fn test_create_single_member_cluster() {
        let fleet = SimFleet::new();
        let seed = InstanceAddress::new("127.0.0.1", 3310);
        fleet.add_server(&seed);
        let ctx = AdminContext::non_interactive(Arc::new(fleet.clone()));

        let handle = create_cluster(&ctx, &seed, "prod", CreateClusterOptions::default()).unwrap();
        assert_eq!(handle.name, "prod");
        let md = metadata::load(&ctx, &seed).unwrap();
        assert_eq!(md.clusters.len(), 1);
        assert_eq!(md.instances.len(), 1);
        assert!(fleet
            .accounts(&seed)
            .iter()
            .any(|(user, _)| user.starts_with("mysql_innodb_cluster_")));
    }

    #[test]
    fn test_multi_primary_needs_force() {
        let fleet = SimFleet::new();
        let seed = InstanceAddress::new("127.0.0.1", 3310);
        fleet.add_server(&seed);
        let ctx = AdminContext::non_interactive(Arc::new(fleet));
        let options = CreateClusterOptions {
            multi_primary: true,
            ..CreateClusterOptions::default()
        };
        let err = create_cluster(&ctx, &seed, "mp", options).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::Aborted);
    }

    #[test]
    fn test_existing_cluster_member_refused() {
        let fleet = SimFleet::new();
        let seed = InstanceAddress::new("127.0.0.1", 3310);
        fleet.add_server(&seed);
        let ctx = AdminContext::non_interactive(Arc::new(fleet));
        create_cluster(&ctx, &seed, "one", CreateClusterOptions::default()).unwrap();
        let err = create_cluster(&ctx, &seed, "two", CreateClusterOptions::default()).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::NotStandalone);
    }
}
