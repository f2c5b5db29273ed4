//! Typed read probes
//!
//! Thin wrappers turning probe rows into typed records. All of them are
//! safe to repeat.

use std::str::FromStr;

use serde::Serialize;
use uuid::Uuid;

use crate::context::AdminContext;
use crate::errors::{AdminError, AdminResult};
use crate::gateway::{single_row, GatewayError, GtidSet, Probe, Row, ServerVersion};
use crate::topology::{InstanceAddress, MemberRole, MemberState};

/// Identity of a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub server_uuid: Uuid,
    pub server_id: u32,
    pub version: ServerVersion,
    pub super_read_only: bool,
}

/// Local group replication state of one server.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalGroupState {
    pub group_name: Option<Uuid>,
    pub running: bool,
    pub member_state: MemberState,
    pub member_role: Option<MemberRole>,
    pub single_primary: bool,
    pub view_id: Option<String>,
    pub protocol_version: String,
    pub communication_stack: String,
}

/// One replication channel as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    pub channel: String,
    pub source: Option<String>,
    pub configured_source: Option<String>,
    pub user: Option<String>,
    pub io_state: String,
    pub sql_state: String,
    pub io_error_number: u64,
    pub io_error_message: String,
    pub sql_error_number: u64,
    pub sql_error_message: String,
    pub auto_failover: Option<bool>,
    pub connect_retry: Option<u64>,
    pub retry_count: Option<u64>,
    pub heartbeat_period: Option<f64>,
    pub compression_algorithms: Option<String>,
    pub zstd_compression_level: Option<u64>,
    pub bind: Option<String>,
    pub network_namespace: Option<String>,
    pub sources: Vec<String>,
}

impl ChannelStatus {
    pub fn has_error(&self) -> bool {
        self.io_error_number != 0 || self.sql_error_number != 0
    }

    pub fn source_address(&self) -> Option<InstanceAddress> {
        self.source.as_deref().and_then(|s| s.parse().ok())
    }
}

fn parse_uuid(value: &str) -> AdminResult<Uuid> {
    Uuid::from_str(value).map_err(|e| {
        AdminError::from(GatewayError::unexpected_result(format!(
            "invalid UUID '{}': {}",
            value, e
        )))
    })
}

fn classify(address: &InstanceAddress) -> impl Fn(GatewayError) -> AdminError + '_ {
    move |e| AdminError::connectivity(address, e)
}

pub fn server_identity(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<ServerIdentity> {
    let rows = ctx.query(address, Probe::ServerIdentity)?;
    let row = single_row(&rows, "server identity").map_err(classify(address))?;
    let version_text = row.str("version").map_err(classify(address))?;
    Ok(ServerIdentity {
        server_uuid: parse_uuid(row.str("server_uuid").map_err(classify(address))?)?,
        server_id: row.u64("server_id").map_err(classify(address))? as u32,
        version: version_text.parse().map_err(classify(address))?,
        super_read_only: row.bool("super_read_only").map_err(classify(address))?,
    })
}

pub fn local_group_state(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<LocalGroupState> {
    let rows = ctx.query(address, Probe::GroupStatus)?;
    let row = single_row(&rows, "group status").map_err(classify(address))?;
    let group_name = match row.opt_str("group_name") {
        Some(name) if !name.is_empty() => Some(parse_uuid(name)?),
        _ => None,
    };
    let member_state = row.str("member_state").map_err(classify(address))?.parse()?;
    let member_role = match row.opt_str("member_role") {
        Some(role) => Some(role.parse()?),
        None => None,
    };
    Ok(LocalGroupState {
        group_name,
        running: row.bool("running").map_err(classify(address))?,
        member_state,
        member_role,
        single_primary: row.bool("single_primary_mode").map_err(classify(address))?,
        view_id: row.opt_str("view_id").map(str::to_string),
        protocol_version: row.opt_str("protocol_version").unwrap_or_default().to_string(),
        communication_stack: row
            .opt_str("communication_stack")
            .unwrap_or("XCOM")
            .to_string(),
    })
}

/// Value of a system variable, `None` when unset.
pub fn variable(ctx: &AdminContext, address: &InstanceAddress, name: &str) -> AdminResult<Option<String>> {
    ctx.connect(address)?
        .variable(name)
        .map_err(classify(address))
}

/// `(gtid_executed, gtid_purged)`
pub fn gtid_state(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<(GtidSet, GtidSet)> {
    let rows = ctx.query(address, Probe::GtidState)?;
    let row = single_row(&rows, "GTID state").map_err(classify(address))?;
    let executed = row
        .str("gtid_executed")
        .and_then(GtidSet::from_str)
        .map_err(classify(address))?;
    let purged = row
        .str("gtid_purged")
        .and_then(GtidSet::from_str)
        .map_err(classify(address))?;
    Ok((executed, purged))
}

fn channel_from_row(row: &Row) -> Result<ChannelStatus, GatewayError> {
    let text = |c: &str| row.opt_str(c).map(str::to_string);
    let sources = row
        .get("sources")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(ChannelStatus {
        channel: row.str("channel")?.to_string(),
        source: text("source"),
        configured_source: text("configured_source"),
        user: text("user"),
        io_state: row.str("io_state")?.to_string(),
        sql_state: row.str("sql_state")?.to_string(),
        io_error_number: row.opt_u64("io_error_number").unwrap_or(0),
        io_error_message: row.opt_str("io_error_message").unwrap_or_default().to_string(),
        sql_error_number: row.opt_u64("sql_error_number").unwrap_or(0),
        sql_error_message: row.opt_str("sql_error_message").unwrap_or_default().to_string(),
        auto_failover: row.get("auto_failover").and_then(|v| v.as_bool()),
        connect_retry: row.opt_u64("connect_retry"),
        retry_count: row.opt_u64("retry_count"),
        heartbeat_period: row.get("heartbeat_period").and_then(|v| v.as_f64()),
        compression_algorithms: text("compression_algorithms"),
        zstd_compression_level: row.opt_u64("zstd_compression_level"),
        bind: text("bind"),
        network_namespace: text("network_namespace"),
        sources,
    })
}

pub fn channels(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<Vec<ChannelStatus>> {
    let rows = ctx.query(address, Probe::Channels)?;
    rows.iter()
        .map(|r| channel_from_row(r).map_err(classify(address)))
        .collect()
}

pub fn channel(ctx: &AdminContext, address: &InstanceAddress, name: &str) -> AdminResult<Option<ChannelStatus>> {
    Ok(channels(ctx, address)?.into_iter().find(|c| c.channel == name))
}

/// Accounts on the server as `(user, host)`.
pub fn accounts(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<Vec<(String, String)>> {
    let rows = ctx.query(address, Probe::Accounts)?;
    rows.iter()
        .map(|r| {
            Ok((
                r.str("user").map_err(classify(address))?.to_string(),
                r.str("host").map_err(classify(address))?.to_string(),
            ))
        })
        .collect()
}

/// Transaction counters of a group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStats {
    pub transactions_checked: u64,
    pub applied: u64,
    pub queued: u64,
    pub conflicts_detected: u64,
    pub rollbacks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applier_worker_threads: Option<u64>,
}

pub fn member_stats(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<MemberStats> {
    let rows = ctx.query(address, Probe::MemberStats)?;
    let row = single_row(&rows, "member stats").map_err(classify(address))?;
    Ok(MemberStats {
        transactions_checked: row.opt_u64("transactions_checked").unwrap_or(0),
        applied: row.opt_u64("applied").unwrap_or(0),
        queued: row.opt_u64("queued").unwrap_or(0),
        conflicts_detected: row.opt_u64("conflicts_detected").unwrap_or(0),
        rollbacks: row.opt_u64("rollbacks").unwrap_or(0),
        applier_worker_threads: row.opt_u64("applier_worker_threads"),
    })
}
