//! Options of cluster operations.

use serde::de::{Error as _, Unexpected};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use uuid::Uuid;

use super::{check_range, token, OperationOptions};
use crate::errors::{AdminError, AdminResult};
use crate::topology::{
    validate_label, InstanceAddress, MemberAuthType, RecoveryMethod, ReplicationSources,
    SourcePolicyToken, SslMode,
};

fn check_recovery_progress(progress: Option<u64>) -> AdminResult<()> {
    match progress {
        Some(p) => check_range("recoveryProgress", p, 0, 2),
        None => Ok(()),
    }
}

fn check_cert_subject(subject: &Option<String>) -> AdminResult<()> {
    if subject.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(AdminError::argument(
            "Invalid value for option 'certSubject': the value cannot be empty.",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterOptions {
    #[serde(default)]
    pub multi_primary: bool,
    /// Confirms a multi-primary cluster in non-interactive mode.
    #[serde(default)]
    pub force: bool,
    #[serde(default, deserialize_with = "token")]
    pub ssl_mode: Option<SslMode>,
    #[serde(default, deserialize_with = "token")]
    pub member_auth_type: Option<MemberAuthType>,
    #[serde(default)]
    pub cert_issuer: Option<String>,
    #[serde(default)]
    pub cert_subject: Option<String>,
    #[serde(default, rename = "adoptFromGR")]
    pub adopt_from_gr: bool,
    #[serde(default)]
    pub group_name: Option<Uuid>,
    #[serde(default)]
    pub disable_clone: bool,
    #[serde(default)]
    pub communication_stack: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for CreateClusterOptions {
    const OPERATION: &'static str = "createCluster";
    const KEYS: &'static [&'static str] = &[
        "multiPrimary",
        "force",
        "sslMode",
        "memberAuthType",
        "certIssuer",
        "certSubject",
        "adoptFromGR",
        "groupName",
        "disableClone",
        "communicationStack",
        "dryRun",
    ];

    fn validate(&self) -> AdminResult<()> {
        check_cert_subject(&self.cert_subject)?;
        if let Some(ref stack) = self.communication_stack {
            let upper = stack.to_ascii_uppercase();
            if upper != "XCOM" && upper != "MYSQL" {
                return Err(AdminError::argument(format!(
                    "Invalid value for option 'communicationStack': '{}'. Allowed values: MYSQL, XCOM.",
                    stack
                )));
            }
        }
        if self.adopt_from_gr && self.group_name.is_some() {
            return Err(AdminError::argument(
                "Cannot use the groupName option if adoptFromGR is set to true.",
            ));
        }
        if self.adopt_from_gr && self.multi_primary {
            return Err(AdminError::argument(
                "Cannot use the multiPrimary option if adoptFromGR is set to true. Using \
                 adoptFromGR mode will adopt the primary mode in use by the group.",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInstanceOptions {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "token")]
    pub recovery_method: Option<RecoveryMethod>,
    #[serde(default)]
    pub recovery_progress: Option<u64>,
    #[serde(default)]
    pub cert_subject: Option<String>,
    /// Seconds to wait for the joiner to come ONLINE; unbounded by default.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl AddInstanceOptions {
    pub fn recovery_method(&self) -> RecoveryMethod {
        self.recovery_method.unwrap_or_default()
    }
}

impl OperationOptions for AddInstanceOptions {
    const OPERATION: &'static str = "addInstance";
    const KEYS: &'static [&'static str] = &[
        "label",
        "recoveryMethod",
        "recoveryProgress",
        "certSubject",
        "timeout",
        "dryRun",
    ];

    fn validate(&self) -> AdminResult<()> {
        if let Some(ref label) = self.label {
            validate_label(label)?;
        }
        check_recovery_progress(self.recovery_progress)?;
        check_cert_subject(&self.cert_subject)
    }
}

/// `replicationSources` given as `"primary"`, `"secondary"` or a list of
/// addresses.
pub(super) fn sources<'de, D>(deserializer: D) -> Result<Option<ReplicationSources>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Some(ReplicationSources::Policy(SourcePolicyToken::Primary))),
            "secondary" => Ok(Some(ReplicationSources::Policy(SourcePolicyToken::Secondary))),
            _ => Err(D::Error::custom(format!(
                "Invalid value for 'replicationSources' option. Allowed values: 'primary', \
                 'secondary' or a list of instances, got '{}'.",
                s
            ))),
        },
        Some(Value::Array(items)) => {
            if items.is_empty() {
                return Err(D::Error::custom(
                    "Invalid value for 'replicationSources' option: the list of sources cannot be empty.",
                ));
            }
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                let Value::String(text) = item else {
                    return Err(D::Error::invalid_type(
                        Unexpected::Other("non-string list entry"),
                        &"a list of host:port strings",
                    ));
                };
                let address: InstanceAddress =
                    text.parse().map_err(|e: AdminError| D::Error::custom(e.message))?;
                list.push(address);
            }
            Ok(Some(ReplicationSources::List(list)))
        }
        Some(_) => Err(D::Error::invalid_type(
            Unexpected::Other("non-string, non-list value"),
            &"'primary', 'secondary' or a list of instances",
        )),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReplicaInstanceOptions {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "token")]
    pub recovery_method: Option<RecoveryMethod>,
    #[serde(default)]
    pub recovery_progress: Option<u64>,
    #[serde(default, deserialize_with = "sources")]
    pub replication_sources: Option<ReplicationSources>,
    #[serde(default)]
    pub cert_subject: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl AddReplicaInstanceOptions {
    pub fn recovery_method(&self) -> RecoveryMethod {
        self.recovery_method.unwrap_or_default()
    }
}

impl OperationOptions for AddReplicaInstanceOptions {
    const OPERATION: &'static str = "addReplicaInstance";
    const KEYS: &'static [&'static str] = &[
        "label",
        "recoveryMethod",
        "recoveryProgress",
        "replicationSources",
        "certSubject",
        "timeout",
        "dryRun",
    ];

    fn validate(&self) -> AdminResult<()> {
        if let Some(ref label) = self.label {
            validate_label(label)?;
        }
        check_recovery_progress(self.recovery_progress)?;
        check_cert_subject(&self.cert_subject)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInstanceOptions {
    /// `None`: ask when interactive, refuse otherwise.
    #[serde(default)]
    pub force: Option<bool>,
    /// Seconds to wait for the member to sync; unbounded by default.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for RemoveInstanceOptions {
    const OPERATION: &'static str = "removeInstance";
    const KEYS: &'static [&'static str] = &["force", "timeout", "dryRun"];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinInstanceOptions {
    #[serde(default, deserialize_with = "token")]
    pub recovery_method: Option<RecoveryMethod>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for RejoinInstanceOptions {
    const OPERATION: &'static str = "rejoinInstance";
    const KEYS: &'static [&'static str] = &["recoveryMethod", "timeout", "dryRun"];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPrimaryInstanceOptions {
    /// Seconds the new primary gets to catch up before the handover.
    #[serde(default)]
    pub running_transactions_timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for SetPrimaryInstanceOptions {
    const OPERATION: &'static str = "setPrimaryInstance";
    const KEYS: &'static [&'static str] = &["runningTransactionsTimeout", "dryRun"];

    fn validate(&self) -> AdminResult<()> {
        match self.running_transactions_timeout {
            Some(t) => check_range("runningTransactionsTimeout", t, 0, 3600),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebootOptions {
    /// Member to bootstrap the group from.
    #[serde(default)]
    pub primary: Option<String>,
    /// Reboot even if the seed's transaction set is not the most complete.
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl RebootOptions {
    pub fn primary(&self) -> AdminResult<Option<InstanceAddress>> {
        self.primary.as_deref().map(str::parse).transpose()
    }
}

impl OperationOptions for RebootOptions {
    const OPERATION: &'static str = "rebootClusterFromCompleteOutage";
    const KEYS: &'static [&'static str] = &["primary", "force", "dryRun"];

    fn validate(&self) -> AdminResult<()> {
        self.primary().map(|_| ())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DissolveOptions {
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for DissolveOptions {
    const OPERATION: &'static str = "dissolve";
    const KEYS: &'static [&'static str] = &["force", "timeout", "dryRun"];
}

/// Which instances a rescan acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceSelection {
    /// Every instance found.
    Auto,
    List(Vec<InstanceAddress>),
}

impl InstanceSelection {
    pub fn includes(&self, address: &InstanceAddress) -> bool {
        match self {
            Self::Auto => true,
            Self::List(list) => list.contains(address),
        }
    }
}

fn selection<'de, D>(deserializer: D) -> Result<Option<InstanceSelection>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("auto") => Ok(Some(InstanceSelection::Auto)),
        Some(Value::String(s)) => Err(D::Error::custom(format!(
            "Option accepts 'auto' or a list of instances, got '{}'.",
            s
        ))),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text
                    .parse::<InstanceAddress>()
                    .map_err(|e| D::Error::custom(e.message)),
                _ => Err(D::Error::invalid_type(
                    Unexpected::Other("non-string list entry"),
                    &"a list of host:port strings",
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|list| Some(InstanceSelection::List(list))),
        Some(_) => Err(D::Error::invalid_type(
            Unexpected::Other("non-string, non-list value"),
            &"'auto' or a list of instances",
        )),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanOptions {
    /// Register members found in the group but not in the metadata.
    #[serde(default, deserialize_with = "selection")]
    pub add_instances: Option<InstanceSelection>,
    /// Forget metadata members no longer found in the group.
    #[serde(default, deserialize_with = "selection")]
    pub remove_instances: Option<InstanceSelection>,
    #[serde(default)]
    pub dry_run: bool,
}

impl OperationOptions for RescanOptions {
    const OPERATION: &'static str = "rescan";
    const KEYS: &'static [&'static str] = &["addInstances", "removeInstances", "dryRun"];
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOptions {
    /// Detail level 0-3.
    #[serde(default)]
    pub extended: u64,
}

impl OperationOptions for StatusOptions {
    const OPERATION: &'static str = "status";
    const KEYS: &'static [&'static str] = &["extended"];

    fn validate(&self) -> AdminResult<()> {
        check_range("extended", self.extended, 0, 3)
    }
}
