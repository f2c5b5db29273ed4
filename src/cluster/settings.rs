//! setOption, setInstanceOption and options

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::auth::check_member_subject;
use super::join::{communication_stack, recorded_group_variables, GROUP_VARIABLES_ATTRIBUTE};
use crate::changes::{run_reverting, ChangeSet};
use crate::clusterset;
use crate::context::{AdminContext, ClusterHandle};
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::Statement;
use crate::metadata::{self, ClusterRecord, InstanceRecord};
use crate::observability::ObservationScope;
use crate::options::{ClusterSetting, GroupVariable, InstanceSetting, CHANNEL_OPTION_KEYS, GROUP_OPTIONS};
use crate::quorum::{check_label_unique, variable, ClusterSnapshot};
use crate::replica;
use crate::topology::InstanceAddress;

/// Group options that must hold the same value on every member.
const CLUSTER_WIDE: &[&str] = &[
    "groupName",
    "communicationStack",
    "consistency",
    "expelTimeout",
    "ipAllowlist",
];

pub fn set_option(ctx: &AdminContext, handle: &ClusterHandle, key: &str, value: &Value) -> AdminResult<()> {
    let scope = ObservationScope::with_fields(
        "SET_OPTION",
        &[("cluster", handle.name.as_str()), ("option", key)],
    );
    let result = ClusterSetting::parse(key, value).and_then(|setting| apply_setting(ctx, handle, setting));
    scope.finish(&result);
    result
}

fn apply_setting(ctx: &AdminContext, handle: &ClusterHandle, setting: ClusterSetting) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let output = ctx.output();
    match setting {
        ClusterSetting::Channel(options) => clusterset::set_channel_options(ctx, &snapshot, &options),
        ClusterSetting::Group(var) => set_group_variable(ctx, &snapshot, &var),
        ClusterSetting::ClusterName(name) => {
            if name == snapshot.name() {
                output.note(format!("The cluster is already named '{}'.", name));
                return Ok(());
            }
            if snapshot.metadata.cluster_by_name(&name).is_some() {
                return Err(AdminError::precondition(
                    AdminErrorKind::InvalidState,
                    format!("A cluster named '{}' already exists in the topology.", name),
                ));
            }
            update_cluster(ctx, &snapshot, |c| c.name = name.clone())?;
            output.info(format!(
                "Successfully set the value of 'clusterName' to '{}' in the cluster: '{}'.",
                name,
                snapshot.name()
            ));
            Ok(())
        }
        ClusterSetting::DisableClone(flag) => {
            update_cluster(ctx, &snapshot, |c| c.disable_clone = flag)?;
            output.info(format!(
                "Successfully set the value of 'disableClone' to '{}' in the cluster: '{}'.",
                flag,
                snapshot.name()
            ));
            Ok(())
        }
    }
}

fn update_cluster(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    edit: impl FnOnce(&mut ClusterRecord),
) -> AdminResult<()> {
    let (writer, mut md) = snapshot.metadata_writer(ctx, "setOption")?;
    let id = snapshot.cluster_id();
    run_reverting(ctx, false, |changes| {
        if let Some(cluster) = md.cluster_mut(&id) {
            edit(cluster);
        }
        metadata::store(changes, &writer, &mut md)
    })
}

fn update_instance(
    ctx: &AdminContext,
    snapshot: &ClusterSnapshot,
    address: &InstanceAddress,
    edit: impl FnOnce(&mut InstanceRecord),
) -> AdminResult<()> {
    let (writer, mut md) = snapshot.metadata_writer(ctx, "setInstanceOption")?;
    run_reverting(ctx, false, |changes| {
        if let Some(record) = md.instance_mut(address) {
            edit(record);
        }
        metadata::store(changes, &writer, &mut md)
    })
}

/// Persist `var` on `address`, registering the previous value for revert.
fn persist_variable(
    changes: &mut ChangeSet<'_>,
    address: &InstanceAddress,
    var: &GroupVariable,
) -> AdminResult<()> {
    let previous = variable(changes.ctx(), address, var.variable)?.unwrap_or_default();
    changes.apply_reversible(
        address,
        Statement::set_persist(var.variable, var.value.clone()),
        Statement::set_persist(var.variable, previous),
    )?;
    Ok(())
}

fn set_group_variable(ctx: &AdminContext, snapshot: &ClusterSnapshot, var: &GroupVariable) -> AdminResult<()> {
    snapshot.require_quorum("setOption")?;
    if let Some(member) = snapshot.members.iter().find(|m| !m.is_online()) {
        return Err(AdminError::precondition(
            AdminErrorKind::InvalidState,
            format!(
                "The instance '{}' is {}; option '{}' can only be changed while every member is ONLINE.",
                member.address(),
                member.state.as_str(),
                var.option
            ),
        ));
    }
    let (writer, mut md) = snapshot.metadata_writer(ctx, "setOption")?;
    let id = snapshot.cluster_id();
    let members: Vec<InstanceAddress> = snapshot.members.iter().map(|m| m.address().clone()).collect();
    let output = ctx.output();
    output.info(format!(
        "Setting the value of '{}' to '{}' in all cluster members ...",
        var.option, var.value
    ));

    run_reverting(ctx, false, |changes| {
        for member in &members {
            persist_variable(changes, member, var)?;
        }
        if let Some(cluster) = md.cluster_mut(&id) {
            let recorded = cluster
                .attributes
                .entry(GROUP_VARIABLES_ATTRIBUTE.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(vars) = recorded {
                vars.insert(var.variable.to_string(), Value::from(var.value.clone()));
            }
        }
        metadata::store(changes, &writer, &mut md)
    })?;

    output.info(format!(
        "Successfully set the value of '{}' to '{}' in the cluster: '{}'.",
        var.option,
        var.value,
        snapshot.name()
    ));
    Ok(())
}

pub fn set_instance_option(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    key: &str,
    value: &Value,
) -> AdminResult<()> {
    let target_text = address.to_string();
    let scope = ObservationScope::with_fields(
        "SET_INSTANCE_OPTION",
        &[
            ("cluster", handle.name.as_str()),
            ("instance", target_text.as_str()),
            ("option", key),
        ],
    );
    let result = InstanceSetting::parse(key, value)
        .and_then(|setting| apply_instance_setting(ctx, handle, address, setting));
    scope.finish(&result);
    result
}

fn apply_instance_setting(
    ctx: &AdminContext,
    handle: &ClusterHandle,
    address: &InstanceAddress,
    setting: InstanceSetting,
) -> AdminResult<()> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let record = snapshot
        .metadata
        .instance(address)
        .filter(|r| r.cluster_id == snapshot.cluster_id())
        .cloned()
        .ok_or_else(|| AdminError::not_member(address, snapshot.name()))?;
    let output = ctx.output();

    match setting {
        InstanceSetting::Label(label) => {
            if label == record.label {
                output.note(format!("The instance '{}' is already labeled '{}'.", address, label));
                return Ok(());
            }
            check_label_unique(&snapshot.metadata, &snapshot.cluster_id(), &label, Some(address))?;
            update_instance(ctx, &snapshot, address, |r| r.label = label.clone())?;
            output.info(format!(
                "Successfully set the value of 'label' to '{}' in the instance: '{}'.",
                label, address
            ));
        }
        InstanceSetting::CertSubject(subject) => {
            check_member_subject(snapshot.cluster.member_auth_type, Some(&subject))?;
            update_instance(ctx, &snapshot, address, |r| r.cert_subject = Some(subject.clone()))?;
            output.info(format!(
                "Successfully set the value of 'certSubject' to '{}' in the instance: '{}'.",
                subject, address
            ));
            output.note(format!(
                "The replication account of '{}' picks up the new subject when the instance is rejoined.",
                address
            ));
        }
        InstanceSetting::ReplicationSources(sources) => {
            if !record.is_read_replica() {
                return Err(AdminError::argument(format!(
                    "Option 'replicationSources' is only supported on Read-Replicas; '{}' is a group member.",
                    address
                )));
            }
            replica::set_replication_sources(ctx, &snapshot, &record, &sources)?;
        }
        InstanceSetting::Group(var) => {
            if record.is_read_replica() {
                return Err(AdminError::argument(format!(
                    "Option '{}' is not supported on Read-Replicas.",
                    var.option
                )));
            }
            ctx.connect(address)?;
            run_reverting(ctx, false, |changes| persist_variable(changes, address, &var))?;
            output.info(format!(
                "Successfully set the value of '{}' to '{}' in the instance: '{}'.",
                var.option, var.value, address
            ));
        }
    }
    Ok(())
}

/// One option and where its value comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionValue {
    pub option: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    pub value: Value,
}

impl OptionValue {
    fn plain(option: &str, value: impl Into<Value>) -> Self {
        Self {
            option: option.to_string(),
            variable: None,
            value: value.into(),
        }
    }

    fn group(option: &str, variable: &str, value: Option<String>) -> Self {
        Self {
            option: option.to_string(),
            variable: Some(variable.to_string()),
            value: value.map(Value::from).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<OptionValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_connect_error: Option<String>,
}

/// Effective configuration of a cluster and each of its instances.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOptions {
    pub name: String,
    pub global_options: Vec<OptionValue>,
    pub topology: BTreeMap<String, InstanceOptions>,
}

pub fn options(ctx: &AdminContext, handle: &ClusterHandle) -> AdminResult<ClusterOptions> {
    let snapshot = ClusterSnapshot::load(ctx, handle)?;
    let cluster = &snapshot.cluster;
    let reader = snapshot.primary();

    let mut global = vec![
        OptionValue::plain("clusterName", cluster.name.clone()),
        OptionValue::plain("disableClone", cluster.disable_clone),
        OptionValue::plain("memberAuthType", cluster.member_auth_type.to_string()),
        OptionValue::plain("sslMode", cluster.ssl_mode.as_str()),
        OptionValue::plain(
            "certIssuer",
            cluster.cert_issuer.clone().map(Value::from).unwrap_or(Value::Null),
        ),
    ];
    let recorded: BTreeMap<String, String> = recorded_group_variables(cluster).into_iter().collect();
    for (option, var) in GROUP_OPTIONS.iter().filter(|(o, _)| CLUSTER_WIDE.contains(o)) {
        let live = reader
            .as_ref()
            .and_then(|p| variable(ctx, p, var).ok().flatten());
        let value = live.or_else(|| match *option {
            "groupName" => Some(cluster.group_name.to_string()),
            "communicationStack" => Some(communication_stack(cluster)),
            _ => recorded.get(*var).cloned(),
        });
        global.push(OptionValue::group(option, var, value));
    }
    if let Some(member) = snapshot.clusterset().and_then(|cs| cs.member(&cluster.cluster_id)) {
        for key in CHANNEL_OPTION_KEYS {
            global.push(OptionValue::plain(
                key,
                member.options.get(*key).cloned().unwrap_or(Value::Null),
            ));
        }
    }

    let mut topology = BTreeMap::new();
    let records: Vec<&InstanceRecord> = snapshot
        .metadata
        .instances
        .iter()
        .filter(|i| i.cluster_id == cluster.cluster_id)
        .collect();
    for record in records {
        let entry = match instance_options(ctx, record) {
            Ok(options) => InstanceOptions {
                options,
                shell_connect_error: None,
            },
            Err(e) => InstanceOptions {
                options: Vec::new(),
                shell_connect_error: Some(e.to_string()),
            },
        };
        topology.insert(record.label.clone(), entry);
    }

    Ok(ClusterOptions {
        name: cluster.name.clone(),
        global_options: global,
        topology,
    })
}

fn instance_options(ctx: &AdminContext, record: &InstanceRecord) -> AdminResult<Vec<OptionValue>> {
    let gateway = ctx.connect(&record.address)?;
    let mut options = vec![OptionValue::plain("label", record.label.clone())];
    if let Some(ref rr) = record.read_replica {
        options.push(OptionValue::plain(
            "replicationSources",
            serde_json::to_value(&rr.replication_sources).unwrap_or(Value::Null),
        ));
        return Ok(options);
    }
    if let Some(ref subject) = record.cert_subject {
        options.push(OptionValue::plain("certSubject", subject.clone()));
    }
    for (option, var) in GROUP_OPTIONS {
        let value = gateway
            .variable(var)
            .map_err(|e| AdminError::connectivity(&record.address, e))?;
        options.push(OptionValue::group(option, var, value));
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::ErrorCategory;
    use crate::fixtures::Lab;

    #[test]
    fn test_member_weight_reaches_every_member() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        set_option(&lab.ctx, &lab.handle, "memberWeight", &json!(70)).unwrap();
        for a in &lab.members {
            assert_eq!(
                variable(&lab.ctx, a, "group_replication_member_weight").unwrap().as_deref(),
                Some("70")
            );
        }
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        assert!(recorded_group_variables(&snapshot.cluster)
            .contains(&("group_replication_member_weight".to_string(), "70".to_string())));
    }

    #[test]
    fn test_label_must_be_unique() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let err = set_instance_option(&lab.ctx, &lab.handle, &lab.members[1], "label", &json!("127.0.0.1:3310"))
            .unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::DuplicateLabel);
        set_instance_option(&lab.ctx, &lab.handle, &lab.members[1], "label", &json!("second")).unwrap();
        let snapshot = ClusterSnapshot::load(&lab.ctx, &lab.handle).unwrap();
        assert_eq!(snapshot.metadata.instance(&lab.members[1]).unwrap().label, "second");
    }

    #[test]
    fn test_rename_cluster() {
        let lab = Lab::cluster("prod", &[3310]);
        set_option(&lab.ctx, &lab.handle, "clusterName", &json!("renamed")).unwrap();
        let renamed = ClusterHandle::new("renamed", lab.handle.seed.clone());
        assert_eq!(ClusterSnapshot::load(&lab.ctx, &renamed).unwrap().name(), "renamed");
    }

    #[test]
    fn test_option_errors_before_any_change() {
        let lab = Lab::cluster("prod", &[3310]);
        let err = set_option(&lab.ctx, &lab.handle, "expelTimeout", &json!(4000)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
        let err = set_option(&lab.ctx, &lab.handle, "clusterSetReplicationConnectRetry", &json!(3))
            .unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::InvalidState);
    }

    #[test]
    fn test_sources_only_on_read_replicas() {
        let lab = Lab::cluster("prod", &[3310, 3320]);
        let err = set_instance_option(
            &lab.ctx,
            &lab.handle,
            &lab.members[1],
            "replicationSources",
            &json!("secondary"),
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
    }

    #[test]
    fn test_options_report() {
        let lab = Lab::cluster("prod", &[3310, 3320, 3330]);
        lab.fleet.kill(&lab.members[2]).unwrap();
        let report = options(&lab.ctx, &lab.handle).unwrap();
        assert_eq!(report.name, "prod");
        assert!(report
            .global_options
            .iter()
            .any(|o| o.option == "groupName" && o.value.is_string()));
        assert!(report.topology["127.0.0.1:3330"].shell_connect_error.is_some());
        assert!(report.topology["127.0.0.1:3310"]
            .options
            .iter()
            .any(|o| o.option == "memberWeight"));
    }
}
