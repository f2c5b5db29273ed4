//! Status records
//!
//! A member record is a base block plus optional extension blocks, one per
//! detail tier. Blocks above the requested tier are `None` and leave no
//! keys in the serialized output. Members that cannot be probed degrade to
//! [`UnreachableMember`].

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::gateway::GtidSet;
use crate::quorum::{ChannelStatus, MemberStats};
use crate::topology::{InstanceAddress, MemberAuthType, MemberRole, MemberState, ReplicationSources};

/// Detail tier of a status call, `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tier(pub u8);

impl Tier {
    pub const BASIC: Tier = Tier(0);
    pub const GROUP: Tier = Tier(1);
    pub const TRANSACTIONS: Tier = Tier(2);
    pub const CHANNELS: Tier = Tier(3);

    pub fn from_extended(extended: u64) -> Self {
        Tier(extended.min(3) as u8)
    }

    pub fn includes(&self, tier: Tier) -> bool {
        *self >= tier
    }
}

/// Availability of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterHealth {
    Ok,
    OkPartial,
    OkNoTolerance,
    OkNoTolerancePartial,
    NoQuorum,
    Offline,
}

impl ClusterHealth {
    /// Writes can be processed.
    pub fn is_available(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::OkPartial | Self::OkNoTolerance | Self::OkNoTolerancePartial
        )
    }

    /// Health of a group with `online` ONLINE members out of `total`
    /// known ones.
    pub fn assess(has_quorum: bool, online: usize, total: usize) -> (Self, String) {
        let inactive = total.saturating_sub(online);
        let partial = match inactive {
            0 => String::new(),
            1 => " 1 member is not active.".to_string(),
            n => format!(" {} members are not active.", n),
        };
        if online == 0 {
            return (
                Self::Offline,
                "Cluster has no ONLINE members. Use rebootClusterFromCompleteOutage to restore it.".to_string(),
            );
        }
        if !has_quorum {
            return (
                Self::NoQuorum,
                format!(
                    "Cluster has no quorum and cannot process write transactions.{}",
                    partial
                ),
            );
        }
        let tolerance = (online - 1) / 2;
        match (tolerance, inactive) {
            (0, 0) => (
                Self::OkNoTolerance,
                "Cluster is ONLINE and cannot tolerate any failures.".to_string(),
            ),
            (0, _) => (
                Self::OkNoTolerancePartial,
                format!("Cluster is NOT tolerant to any failures.{}", partial),
            ),
            (n, 0) => (
                Self::Ok,
                format!("Cluster is ONLINE and can tolerate up to {} failure{}.", n, plural(n)),
            ),
            (n, _) => (
                Self::OkPartial,
                format!(
                    "Cluster is ONLINE and can tolerate up to {} failure{}.{}",
                    n,
                    plural(n),
                    partial
                ),
            ),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Role of a cluster inside a ClusterSet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterRole {
    Primary,
    Replica,
}

/// Group-protocol internals, reported from tier 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInformation {
    pub group_name: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_view_id: Option<String>,
    #[serde(rename = "GRProtocolVersion")]
    pub protocol_version: String,
    pub communication_stack: String,
    pub member_auth_type: MemberAuthType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_issuer: Option<String>,
}

/// Tier 1 member block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberIdentityBlock {
    pub member_id: Uuid,
    /// Fencing variables currently set.
    pub fence_sys_vars: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_subject: Option<String>,
}

/// Tier 2 member block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsBlock {
    pub transactions: MemberStats,
}

/// One replication thread pair as reported at tier 3.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReport {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub receiver_status: String,
    pub applier_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&ChannelStatus> for ChannelReport {
    fn from(status: &ChannelStatus) -> Self {
        let last_error = if status.io_error_number != 0 {
            Some(format!("{}: {}", status.io_error_number, status.io_error_message))
        } else if status.sql_error_number != 0 {
            Some(format!("{}: {}", status.sql_error_number, status.sql_error_message))
        } else {
            None
        };
        Self {
            channel: status.channel.clone(),
            source: status.source.clone(),
            receiver_status: status.io_state.clone(),
            applier_status: status.sql_state.clone(),
            last_error,
        }
    }
}

/// Tier 3 member block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsBlock {
    pub channels: Vec<ChannelReport>,
}

/// A group member that could be probed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetail {
    pub address: InstanceAddress,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member_role: Option<MemberRole>,
    pub mode: &'static str,
    pub status: MemberState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Transactions received by the member but not applied yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_lag: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instance_errors: Vec<String>,
    #[serde(flatten)]
    pub identity: Option<MemberIdentityBlock>,
    #[serde(flatten)]
    pub transactions: Option<TransactionsBlock>,
    #[serde(flatten)]
    pub channels: Option<ChannelsBlock>,
}

/// A member that could not be probed: only the connect error is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreachableMember {
    pub address: InstanceAddress,
    pub status: MemberState,
    pub shell_connect_error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MemberReport {
    Member(Box<MemberDetail>),
    Unreachable(UnreachableMember),
}

impl MemberReport {
    pub fn address(&self) -> &InstanceAddress {
        match self {
            Self::Member(m) => &m.address,
            Self::Unreachable(u) => &u.address,
        }
    }

    pub fn status(&self) -> MemberState {
        match self {
            Self::Member(m) => m.status,
            Self::Unreachable(u) => u.status,
        }
    }

    pub fn detail(&self) -> Option<&MemberDetail> {
        match self {
            Self::Member(m) => Some(m),
            Self::Unreachable(_) => None,
        }
    }
}

/// State of a Read-Replica, derived from its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadReplicaState {
    Online,
    Connecting,
    Offline,
    Error,
    Unreachable,
}

impl ReadReplicaState {
    pub fn of_channel(channel: Option<&ChannelStatus>) -> Self {
        match channel {
            None => Self::Offline,
            Some(c) if c.has_error() => Self::Error,
            Some(c) if c.io_state == "CONNECTING" => Self::Connecting,
            Some(c) if c.io_state == "ON" && c.sql_state == "ON" => Self::Online,
            Some(_) => Self::Offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReplicaReport {
    pub address: InstanceAddress,
    pub label: String,
    pub role: &'static str,
    pub mode: &'static str,
    pub status: ReadReplicaState,
    pub replication_sources: ReplicationSources,
    /// Source the channel is connected to right now.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Transactions of the cluster the replica has not applied yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_lag: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instance_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_connect_error: Option<String>,
    #[serde(flatten)]
    pub channels: Option<ChannelsBlock>,
}

/// `gtid_executed` difference rendered for reports, `None` when empty.
pub fn gtid_text(set: &GtidSet) -> Option<String> {
    if set.is_empty() {
        None
    } else {
        Some(set.to_string())
    }
}

/// Members keyed by address text, the shape of every topology map.
pub type Topology<T> = BTreeMap<String, T>;
