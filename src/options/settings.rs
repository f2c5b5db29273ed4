//! Typed `setOption` / `setInstanceOption` values.

use serde::Deserialize;
use serde_json::{json, Value};

use super::clusterset::{ClusterSetChannelOptions, CHANNEL_OPTION_KEYS};
use super::{check_range, parse_error};
use crate::errors::{AdminError, AdminResult};
use crate::topology::{validate_cluster_name, validate_label, ReplicationSources};

const EXIT_STATE_ACTIONS: &[&str] = &["ABORT_SERVER", "OFFLINE_MODE", "READ_ONLY"];
const CONSISTENCY_LEVELS: &[&str] = &[
    "EVENTUAL",
    "BEFORE_ON_PRIMARY_FAILOVER",
    "BEFORE",
    "AFTER",
    "BEFORE_AND_AFTER",
];

/// Group options reported by `options`, with the variable behind each.
pub const GROUP_OPTIONS: &[(&str, &str)] = &[
    ("groupName", "group_replication_group_name"),
    ("groupSeeds", "group_replication_group_seeds"),
    ("localAddress", "group_replication_local_address"),
    ("communicationStack", "group_replication_communication_stack"),
    ("consistency", "group_replication_consistency"),
    ("exitStateAction", "group_replication_exit_state_action"),
    ("expelTimeout", "group_replication_member_expel_timeout"),
    ("memberWeight", "group_replication_member_weight"),
    ("autoRejoinTries", "group_replication_autorejoin_tries"),
    ("ipAllowlist", "group_replication_ip_allowlist"),
];

/// A group replication variable set through an option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVariable {
    pub option: &'static str,
    pub variable: &'static str,
    pub value: String,
}

/// Parsed `setOption` key/value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterSetting {
    ClusterName(String),
    DisableClone(bool),
    Group(GroupVariable),
    Channel(ClusterSetChannelOptions),
}

/// Parsed `setInstanceOption` key/value.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceSetting {
    Label(String),
    CertSubject(String),
    ReplicationSources(ReplicationSources),
    Group(GroupVariable),
}

fn wrong_type(operation: &str, option: &str, expected: &str) -> AdminError {
    AdminError::type_error(format!(
        "{}: option '{}' expects {}.",
        operation, option, expected
    ))
}

fn string_value<'v>(operation: &str, option: &str, value: &'v Value) -> AdminResult<&'v str> {
    value
        .as_str()
        .ok_or_else(|| wrong_type(operation, option, "a string"))
}

fn integer_value(operation: &str, option: &str, value: &Value, min: u64, max: u64) -> AdminResult<u64> {
    if value.is_string() || value.is_boolean() || value.is_null() || value.is_object() || value.is_array() {
        return Err(wrong_type(operation, option, "an integer"));
    }
    let n = value.as_u64().ok_or_else(|| {
        AdminError::argument(format!(
            "Invalid value for option '{}': {}. Allowed range is {}..{}.",
            option, value, min, max
        ))
    })?;
    check_range(option, n, min, max)?;
    Ok(n)
}

fn enum_value(operation: &str, option: &str, value: &Value, allowed: &[&str]) -> AdminResult<String> {
    let text = string_value(operation, option, value)?.to_ascii_uppercase();
    if !allowed.contains(&text.as_str()) {
        return Err(AdminError::argument(format!(
            "Invalid value for option '{}': '{}'. Allowed values: {}.",
            option,
            text,
            allowed.join(", ")
        )));
    }
    Ok(text)
}

/// Group variable options shared by both setters.
fn group_variable(operation: &str, key: &str, value: &Value) -> AdminResult<Option<GroupVariable>> {
    let (option, variable, value) = match key {
        "exitStateAction" => (
            "exitStateAction",
            "group_replication_exit_state_action",
            enum_value(operation, key, value, EXIT_STATE_ACTIONS)?,
        ),
        "memberWeight" => (
            "memberWeight",
            "group_replication_member_weight",
            integer_value(operation, key, value, 0, 100)?.to_string(),
        ),
        "autoRejoinTries" => (
            "autoRejoinTries",
            "group_replication_autorejoin_tries",
            integer_value(operation, key, value, 0, 2016)?.to_string(),
        ),
        _ => return Ok(None),
    };
    Ok(Some(GroupVariable {
        option,
        variable,
        value,
    }))
}

impl ClusterSetting {
    pub fn parse(key: &str, value: &Value) -> AdminResult<Self> {
        const OP: &str = "setOption";
        if let Some(group) = group_variable(OP, key, value)? {
            return Ok(Self::Group(group));
        }
        let (option, variable, text) = match key {
            "clusterName" => {
                let name = string_value(OP, key, value)?;
                validate_cluster_name(name)?;
                return Ok(Self::ClusterName(name.to_string()));
            }
            "disableClone" => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| wrong_type(OP, key, "a boolean"))?;
                return Ok(Self::DisableClone(flag));
            }
            "consistency" => (
                "consistency",
                "group_replication_consistency",
                enum_value(OP, key, value, CONSISTENCY_LEVELS)?,
            ),
            "expelTimeout" => (
                "expelTimeout",
                "group_replication_member_expel_timeout",
                integer_value(OP, key, value, 0, 3600)?.to_string(),
            ),
            "ipAllowlist" => (
                "ipAllowlist",
                "group_replication_ip_allowlist",
                string_value(OP, key, value)?.to_string(),
            ),
            k if CHANNEL_OPTION_KEYS.contains(&k) => {
                return Ok(Self::Channel(ClusterSetChannelOptions::single(k, value)?));
            }
            other => {
                return Err(AdminError::argument(format!(
                    "Option '{}' not supported by setOption.",
                    other
                )))
            }
        };
        Ok(Self::Group(GroupVariable {
            option,
            variable,
            value: text,
        }))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourcesValue {
    #[serde(default, deserialize_with = "super::cluster::sources")]
    replication_sources: Option<ReplicationSources>,
}

impl InstanceSetting {
    pub fn parse(key: &str, value: &Value) -> AdminResult<Self> {
        const OP: &str = "setInstanceOption";
        if let Some(group) = group_variable(OP, key, value)? {
            return Ok(Self::Group(group));
        }
        match key {
            "label" => {
                let label = string_value(OP, key, value)?;
                validate_label(label)?;
                Ok(Self::Label(label.to_string()))
            }
            "certSubject" => {
                let subject = string_value(OP, key, value)?;
                if subject.trim().is_empty() {
                    return Err(AdminError::argument(
                        "Invalid value for option 'certSubject': the value cannot be empty.",
                    ));
                }
                Ok(Self::CertSubject(subject.to_string()))
            }
            "replicationSources" => {
                let parsed: SourcesValue =
                    serde_json::from_value(json!({ "replicationSources": value }))
                        .map_err(|e| parse_error(OP, &e))?;
                parsed
                    .replication_sources
                    .map(Self::ReplicationSources)
                    .ok_or_else(|| wrong_type(OP, key, "'primary', 'secondary' or a list of instances"))
            }
            other => Err(AdminError::argument(format!(
                "Option '{}' not supported by setInstanceOption.",
                other
            ))),
        }
    }
}
