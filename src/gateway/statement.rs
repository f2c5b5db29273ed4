//! Administrative statements
//!
//! Everything the orchestrator asks of an instance is one [`Statement`]:
//! read probes as well as mutating commands. Each statement renders to the
//! SQL text it stands for, with secrets masked, for logs and dry-run plans.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::topology::InstanceAddress;

/// Channel used by the group to recover joining members.
pub const RECOVERY_CHANNEL: &str = "group_replication_recovery";
/// Channel used by the group applier.
pub const APPLIER_CHANNEL: &str = "group_replication_applier";
/// Channel a Read-Replica receives from.
pub const READ_REPLICA_CHANNEL: &str = "read_replica_replication";
/// Channel a replica cluster receives from the primary cluster.
pub const CLUSTERSET_CHANNEL: &str = "clusterset_replication";

/// Read probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// `server_uuid`, `server_id`, `version`, `super_read_only`
    ServerIdentity,
    /// Local group state: `group_name`, `running`, `member_state`,
    /// `single_primary_mode`, `view_id`, `protocol_version`, `communication_stack`
    GroupStatus,
    /// Members in the local view: `member_id`, `address`, `state`, `role`, `version`
    GroupMembers,
    /// `gtid_executed`, `gtid_purged`
    GtidState,
    /// One row per replication channel
    Channels,
    /// Local transaction counters
    MemberStats,
    /// `user`, `host` per account
    Accounts,
    /// Zero or one row with the topology metadata `document`
    Metadata,
}

impl Probe {
    fn sql(&self) -> &'static str {
        match self {
            Self::ServerIdentity => "SELECT @@server_uuid, @@server_id, @@version, @@super_read_only",
            Self::GroupStatus => "SELECT * FROM performance_schema.replication_group_members WHERE member_id = @@server_uuid",
            Self::GroupMembers => "SELECT * FROM performance_schema.replication_group_members",
            Self::GtidState => "SELECT @@gtid_executed, @@gtid_purged",
            Self::Channels => "SELECT * FROM performance_schema.replication_connection_status",
            Self::MemberStats => "SELECT * FROM performance_schema.replication_group_member_stats WHERE member_id = @@server_uuid",
            Self::Accounts => "SELECT user, host FROM mysql.user",
            Self::Metadata => "SELECT document FROM mysql_innodb_cluster_metadata.topology",
        }
    }
}

/// Account to create for replication traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub user: String,
    pub host: String,
    pub password: Option<String>,
    pub cert_issuer: Option<String>,
    pub cert_subject: Option<String>,
}

/// Replication channel settings. Only `Some` fields are changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelConfig {
    pub source: Option<InstanceAddress>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub auto_failover: Option<bool>,
    pub connect_retry: Option<u64>,
    pub retry_count: Option<u64>,
    pub heartbeat_period: Option<f64>,
    pub compression_algorithms: Option<String>,
    pub zstd_compression_level: Option<u64>,
    pub bind: Option<String>,
    pub network_namespace: Option<String>,
}

impl ChannelConfig {
    /// Values a freshly created or reset channel reports.
    pub fn server_defaults() -> Self {
        Self {
            source: None,
            user: None,
            password: None,
            auto_failover: Some(false),
            connect_retry: Some(60),
            retry_count: Some(86400),
            heartbeat_period: Some(30.0),
            compression_algorithms: Some("uncompressed".to_string()),
            zstd_compression_level: Some(3),
            bind: Some(String::new()),
            network_namespace: Some(String::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ChannelConfig::default()
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if let Some(ref source) = self.source {
            parts.push(format!("SOURCE_HOST='{}'", source.host()));
            parts.push(format!("SOURCE_PORT={}", source.port()));
        }
        if let Some(ref user) = self.user {
            parts.push(format!("SOURCE_USER='{}'", user));
        }
        if self.password.is_some() {
            parts.push("SOURCE_PASSWORD='****'".to_string());
        }
        if let Some(v) = self.auto_failover {
            parts.push(format!("SOURCE_CONNECTION_AUTO_FAILOVER={}", u8::from(v)));
        }
        if let Some(v) = self.connect_retry {
            parts.push(format!("SOURCE_CONNECT_RETRY={}", v));
        }
        if let Some(v) = self.retry_count {
            parts.push(format!("SOURCE_RETRY_COUNT={}", v));
        }
        if let Some(v) = self.heartbeat_period {
            parts.push(format!("SOURCE_HEARTBEAT_PERIOD={}", v));
        }
        if let Some(ref v) = self.compression_algorithms {
            parts.push(format!("SOURCE_COMPRESSION_ALGORITHMS='{}'", v));
        }
        if let Some(v) = self.zstd_compression_level {
            parts.push(format!("SOURCE_ZSTD_COMPRESSION_LEVEL={}", v));
        }
        if let Some(ref v) = self.bind {
            parts.push(format!("SOURCE_BIND='{}'", v));
        }
        if let Some(ref v) = self.network_namespace {
            parts.push(format!("NETWORK_NAMESPACE='{}'", v));
        }
        f.write_str(&parts.join(", "))
    }
}

/// Candidate source for a channel with automatic failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailoverSource {
    /// A single instance.
    Instance { address: InstanceAddress, weight: u8 },
    /// Every member of a group, weighted by its current role.
    Group {
        group_name: Uuid,
        seed: InstanceAddress,
        primary_weight: u8,
        secondary_weight: u8,
    },
}

impl fmt::Display for FailoverSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance { address, weight } => write!(f, "{}@{}", address, weight),
            Self::Group {
                group_name,
                seed,
                primary_weight,
                secondary_weight,
            } => write!(
                f,
                "group {} via {} (primary {}, secondary {})",
                group_name, seed, primary_weight, secondary_weight
            ),
        }
    }
}

/// Statement issued against one instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Probe(Probe),
    SetPersist { variable: String, value: String },
    CreateAccount(AccountSpec),
    DropAccount { user: String, host: String },
    SetRecoveryCredentials { user: String, password: Option<String> },
    StartGroupReplication { bootstrap: bool },
    StopGroupReplication,
    SetPrimary { server_uuid: Uuid },
    SwitchToSinglePrimary { server_uuid: Option<Uuid> },
    SwitchToMultiPrimary,
    ForceMembers { addresses: Vec<InstanceAddress> },
    ChangeSource { channel: String, config: ChannelConfig },
    StartReplica { channel: String },
    StopReplica { channel: String },
    ResetReplica { channel: String },
    SetFailoverSources { channel: String, sources: Vec<FailoverSource> },
    Clone { donor: InstanceAddress },
    StoreMetadata { document: String },
    DropMetadata,
    SetSuperReadOnly { enabled: bool },
}

impl Statement {
    pub fn set_persist(variable: &str, value: impl Into<String>) -> Self {
        Self::SetPersist {
            variable: variable.to_string(),
            value: value.into(),
        }
    }

    /// Whether executing the statement changes server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Probe(_))
    }

    /// Stable name of the statement kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Probe(_) => "PROBE",
            Self::SetPersist { .. } => "SET_PERSIST",
            Self::CreateAccount(_) => "CREATE_ACCOUNT",
            Self::DropAccount { .. } => "DROP_ACCOUNT",
            Self::SetRecoveryCredentials { .. } => "SET_RECOVERY_CREDENTIALS",
            Self::StartGroupReplication { .. } => "START_GROUP_REPLICATION",
            Self::StopGroupReplication => "STOP_GROUP_REPLICATION",
            Self::SetPrimary { .. } => "SET_PRIMARY",
            Self::SwitchToSinglePrimary { .. } => "SWITCH_TO_SINGLE_PRIMARY",
            Self::SwitchToMultiPrimary => "SWITCH_TO_MULTI_PRIMARY",
            Self::ForceMembers { .. } => "FORCE_MEMBERS",
            Self::ChangeSource { .. } => "CHANGE_SOURCE",
            Self::StartReplica { .. } => "START_REPLICA",
            Self::StopReplica { .. } => "STOP_REPLICA",
            Self::ResetReplica { .. } => "RESET_REPLICA",
            Self::SetFailoverSources { .. } => "SET_FAILOVER_SOURCES",
            Self::Clone { .. } => "CLONE",
            Self::StoreMetadata { .. } => "STORE_METADATA",
            Self::DropMetadata => "DROP_METADATA",
            Self::SetSuperReadOnly { .. } => "SET_SUPER_READ_ONLY",
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe(probe) => f.write_str(probe.sql()),
            Self::SetPersist { variable, value } => {
                write!(f, "SET PERSIST {} = '{}'", variable, value)
            }
            Self::CreateAccount(spec) => {
                write!(f, "CREATE USER '{}'@'{}'", spec.user, spec.host)?;
                if spec.password.is_some() {
                    f.write_str(" IDENTIFIED BY '****'")?;
                }
                let mut require = Vec::new();
                if let Some(ref issuer) = spec.cert_issuer {
                    require.push(format!("ISSUER '{}'", issuer));
                }
                if let Some(ref subject) = spec.cert_subject {
                    require.push(format!("SUBJECT '{}'", subject));
                }
                if !require.is_empty() {
                    write!(f, " REQUIRE {}", require.join(" AND "))?;
                }
                Ok(())
            }
            Self::DropAccount { user, host } => {
                write!(f, "DROP USER IF EXISTS '{}'@'{}'", user, host)
            }
            Self::SetRecoveryCredentials { user, password } => {
                write!(f, "CHANGE REPLICATION SOURCE TO SOURCE_USER='{}'", user)?;
                if password.is_some() {
                    f.write_str(", SOURCE_PASSWORD='****'")?;
                }
                write!(f, " FOR CHANNEL '{}'", RECOVERY_CHANNEL)
            }
            Self::StartGroupReplication { bootstrap } => {
                if *bootstrap {
                    f.write_str("SET GLOBAL group_replication_bootstrap_group = ON; START GROUP_REPLICATION; SET GLOBAL group_replication_bootstrap_group = OFF")
                } else {
                    f.write_str("START GROUP_REPLICATION")
                }
            }
            Self::StopGroupReplication => f.write_str("STOP GROUP_REPLICATION"),
            Self::SetPrimary { server_uuid } => {
                write!(f, "SELECT group_replication_set_as_primary('{}')", server_uuid)
            }
            Self::SwitchToSinglePrimary { server_uuid } => match server_uuid {
                Some(uuid) => write!(
                    f,
                    "SELECT group_replication_switch_to_single_primary_mode('{}')",
                    uuid
                ),
                None => f.write_str("SELECT group_replication_switch_to_single_primary_mode()"),
            },
            Self::SwitchToMultiPrimary => {
                f.write_str("SELECT group_replication_switch_to_multi_primary_mode()")
            }
            Self::ForceMembers { addresses } => {
                let list: Vec<String> = addresses.iter().map(|a| a.local_address().to_string()).collect();
                write!(f, "SET GLOBAL group_replication_force_members = '{}'", list.join(","))
            }
            Self::ChangeSource { channel, config } => {
                write!(f, "CHANGE REPLICATION SOURCE TO {} FOR CHANNEL '{}'", config, channel)
            }
            Self::StartReplica { channel } => write!(f, "START REPLICA FOR CHANNEL '{}'", channel),
            Self::StopReplica { channel } => write!(f, "STOP REPLICA FOR CHANNEL '{}'", channel),
            Self::ResetReplica { channel } => {
                write!(f, "RESET REPLICA ALL FOR CHANNEL '{}'", channel)
            }
            Self::SetFailoverSources { channel, sources } => {
                let list: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "SELECT asynchronous_connection_failover_reset('{}', [{}])",
                    channel,
                    list.join(", ")
                )
            }
            Self::Clone { donor } => write!(
                f,
                "CLONE INSTANCE FROM '{}'@'{}':{} IDENTIFIED BY '****'",
                "mysql_innodb_cluster_clone",
                donor.host(),
                donor.port()
            ),
            Self::StoreMetadata { .. } => {
                f.write_str("REPLACE INTO mysql_innodb_cluster_metadata.topology (document) VALUES (?)")
            }
            Self::DropMetadata => f.write_str("DROP SCHEMA IF EXISTS mysql_innodb_cluster_metadata"),
            Self::SetSuperReadOnly { enabled } => write!(
                f,
                "SET PERSIST super_read_only = {}",
                if *enabled { "ON" } else { "OFF" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_are_masked() {
        let stmt = Statement::CreateAccount(AccountSpec {
            user: "mysql_innodb_cluster_1".to_string(),
            host: "%".to_string(),
            password: Some("s3cret".to_string()),
            cert_issuer: Some("/CN=ca".to_string()),
            cert_subject: None,
        });
        let text = stmt.to_string();
        assert!(!text.contains("s3cret"));
        assert!(text.contains("REQUIRE ISSUER '/CN=ca'"));

        let change = Statement::ChangeSource {
            channel: READ_REPLICA_CHANNEL.to_string(),
            config: ChannelConfig {
                source: Some(InstanceAddress::new("h", 3306)),
                password: Some("pw".to_string()),
                ..Default::default()
            },
        };
        let text = change.to_string();
        assert!(!text.contains("pw'"));
        assert!(text.contains("SOURCE_HOST='h'"));
        assert!(text.ends_with("FOR CHANNEL 'read_replica_replication'"));
    }

    #[test]
    fn test_probe_is_not_mutating() {
        assert!(!Statement::Probe(Probe::GroupMembers).is_mutating());
        assert!(Statement::StopGroupReplication.is_mutating());
    }

    #[test]
    fn test_force_members_uses_local_addresses() {
        let stmt = Statement::ForceMembers {
            addresses: vec![InstanceAddress::new("a", 3306)],
        };
        assert!(stmt.to_string().contains("a:33061"));
    }
}
