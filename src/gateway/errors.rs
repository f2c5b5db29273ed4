//! Transport Error Types
//!
//! A gateway failure carries the numeric error code and message reported by
//! the server or the client library. The orchestrator never rewrites them;
//! it classifies the code and adds its own interpretation on top.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::InstanceAddress;

/// Well-known error codes.
pub mod codes {
    /// Access denied for user
    pub const ER_ACCESS_DENIED: u32 = 1045;
    /// Unknown system variable
    pub const ER_UNKNOWN_SYSTEM_VARIABLE: u32 = 1193;
    /// Server running with --super-read-only
    pub const ER_OPTION_PREVENTS_STATEMENT: u32 = 1290;
    /// Operation CREATE USER failed
    pub const ER_CANNOT_USER: u32 = 1396;
    /// Group replication could not start
    pub const ER_GROUP_REPLICATION_CONFIGURATION: u32 = 3092;
    /// Group replication command failed (primary change, mode switch, force members)
    pub const ER_GRP_RPL_UDF_ERROR: u32 = 3910;
    /// Replication channel does not exist
    pub const ER_REPLICA_CHANNEL_DOES_NOT_EXIST: u32 = 3074;
    /// Replication threads must be stopped first
    pub const ER_REPLICA_CHANNEL_MUST_STOP: u32 = 3085;
    /// Group replication already running
    pub const ER_GROUP_REPLICATION_RUNNING: u32 = 3093;
    /// Commit hook refused the transaction (group without quorum)
    pub const ER_RUN_HOOK_ERROR: u32 = 3100;
    /// Source purged binary logs the replica still needs
    pub const ER_SOURCE_HAS_PURGED_REQUIRED_GTIDS: u32 = 13114;
    /// Clone donor error
    pub const ER_CLONE_DONOR: u32 = 3862;
    /// Statement injected to fail
    pub const ER_INJECTED_FAILURE: u32 = 3999;
    /// Can't connect to server
    pub const CR_CONN_REFUSED: u32 = 2003;
    /// Unknown host
    pub const CR_UNKNOWN_HOST: u32 = 2005;
    /// Server has gone away
    pub const CR_SERVER_GONE: u32 = 2006;
    /// Lost connection during query
    pub const CR_SERVER_LOST: u32 = 2013;
    /// Malformed packet / unexpected result shape
    pub const CR_MALFORMED_PACKET: u32 = 2027;
}

/// Transport error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    AccessDenied,
    ConnectionRefused,
    UnknownHost,
    ConnectionLost,
    ReadOnly,
    Other,
}

/// Error reported by an instance gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("MySQL Error {code}: {message}")]
pub struct GatewayError {
    /// Server or client error code
    pub code: u32,
    /// Verbatim error message
    pub message: String,
}

impl GatewayError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn access_denied(user: &str) -> Self {
        Self::new(
            codes::ER_ACCESS_DENIED,
            format!("Access denied for user '{}'@'%' (using password: YES)", user),
        )
    }

    pub fn connection_refused(address: &InstanceAddress) -> Self {
        Self::new(
            codes::CR_CONN_REFUSED,
            format!(
                "Can't connect to MySQL server on '{}' (111)",
                address
            ),
        )
    }

    pub fn unknown_host(address: &InstanceAddress) -> Self {
        Self::new(
            codes::CR_UNKNOWN_HOST,
            format!("Unknown MySQL server host '{}' (-2)", address.host()),
        )
    }

    pub fn connection_lost() -> Self {
        Self::new(
            codes::CR_SERVER_LOST,
            "Lost connection to MySQL server during query",
        )
    }

    pub fn read_only() -> Self {
        Self::new(
            codes::ER_OPTION_PREVENTS_STATEMENT,
            "The MySQL server is running with the --super-read-only option so it cannot \
             execute this statement",
        )
    }

    pub fn unexpected_result(detail: impl Into<String>) -> Self {
        Self::new(codes::CR_MALFORMED_PACKET, detail)
    }

    /// Classify the error code.
    pub fn kind(&self) -> TransportErrorKind {
        match self.code {
            codes::ER_ACCESS_DENIED => TransportErrorKind::AccessDenied,
            codes::CR_CONN_REFUSED => TransportErrorKind::ConnectionRefused,
            codes::CR_UNKNOWN_HOST => TransportErrorKind::UnknownHost,
            codes::CR_SERVER_GONE | codes::CR_SERVER_LOST => TransportErrorKind::ConnectionLost,
            codes::ER_OPTION_PREVENTS_STATEMENT => TransportErrorKind::ReadOnly,
            _ => TransportErrorKind::Other,
        }
    }

    /// Whether the error means the instance could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self.kind(),
            TransportErrorKind::ConnectionRefused
                | TransportErrorKind::UnknownHost
                | TransportErrorKind::ConnectionLost
        )
    }
}

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;
