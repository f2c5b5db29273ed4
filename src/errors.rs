//! Orchestration Error Types
//!
//! Every failure surfaced by an operation falls in exactly one category:
//! - Argument: malformed or out-of-range input, caught before any remote call
//! - Type: an option value of the wrong type
//! - Connectivity: a remote call failed at the transport layer
//! - Precondition: the topology does not allow the operation
//! - StateTransition: a wait or a replication thread failed mid-operation
//!
//! Transport failures keep the underlying error code and message so they
//! can be reported verbatim next to the engine's interpretation.

use std::fmt;

use crate::gateway::{GatewayError, TransportErrorKind};
use crate::metadata::MetadataError;
use crate::topology::InstanceAddress;

/// Error category, one per entry of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Argument,
    Type,
    Connectivity,
    Precondition,
    StateTransition,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Argument => "ArgumentError",
            Self::Type => "TypeError",
            Self::Connectivity => "ConnectivityError",
            Self::Precondition => "PreconditionError",
            Self::StateTransition => "StateTransitionError",
            Self::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminErrorKind {
    /// Malformed or out-of-range argument
    InvalidArgument,

    /// Option value of the wrong type
    InvalidType,

    /// Transport-level failure talking to an instance
    Connectivity,

    /// Instance is not part of the cluster metadata
    NotMember,

    /// Instance already belongs to this cluster
    AlreadyMember,

    /// Instance belongs to another cluster or replicaset
    NotStandalone,

    /// Instance carries a replication channel the engine does not manage
    UnsupportedChannel,

    /// Group has no quorum
    NoQuorum,

    /// Group still has quorum (forced quorum refused)
    HasQuorum,

    /// Server id already used in the topology
    DuplicateServerId,

    /// Server UUID already used in the topology
    DuplicateServerUuid,

    /// Label already used in the cluster
    DuplicateLabel,

    /// Read-Replica source invalid (not ONLINE, is a Read-Replica, duplicated, unknown)
    InvalidSource,

    /// Topology is in a state that does not allow the operation
    InvalidState,

    /// Server version does not support the operation
    IncompatibleVersion,

    /// Candidate carries transactions that did not originate in the cluster
    ErrantTransactions,

    /// No safe provisioning method available
    ProvisioningUnavailable,

    /// Timed out waiting for transactions to synchronize
    SyncTimeout,

    /// Timed out waiting for a member state transition
    StateTimeout,

    /// Replication applier or receiver reported an error
    ReplicationThreadError,

    /// Operation aborted by the operator or the conservative default
    Aborted,

    /// Metadata document missing or unreadable
    Metadata,

    /// Internal invariant broken
    Internal,
}

impl AdminErrorKind {
    /// Category of this kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument => ErrorCategory::Argument,
            Self::InvalidType => ErrorCategory::Type,
            Self::Connectivity => ErrorCategory::Connectivity,
            Self::NotMember
            | Self::AlreadyMember
            | Self::NotStandalone
            | Self::UnsupportedChannel
            | Self::NoQuorum
            | Self::HasQuorum
            | Self::DuplicateServerId
            | Self::DuplicateServerUuid
            | Self::DuplicateLabel
            | Self::InvalidSource
            | Self::InvalidState
            | Self::IncompatibleVersion
            | Self::ErrantTransactions
            | Self::ProvisioningUnavailable
            | Self::Aborted => ErrorCategory::Precondition,
            Self::SyncTimeout | Self::StateTimeout | Self::ReplicationThreadError => {
                ErrorCategory::StateTransition
            }
            Self::Metadata | Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// Orchestration error.
#[derive(Debug, Clone)]
pub struct AdminError {
    /// Error kind
    pub kind: AdminErrorKind,
    /// Engine-level message
    pub message: String,
    /// Underlying transport failure, reported verbatim
    pub cause: Option<GatewayError>,
}

impl AdminError {
    /// Create a new error.
    pub fn new(kind: AdminErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the transport failure behind this error.
    pub fn with_cause(mut self, cause: GatewayError) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Create an argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(AdminErrorKind::InvalidArgument, message)
    }

    /// Create a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(AdminErrorKind::InvalidType, message)
    }

    /// Create a precondition error of the given kind.
    pub fn precondition(kind: AdminErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    /// Map a transport failure against `address` to an actionable error.
    pub fn connectivity(address: &InstanceAddress, cause: GatewayError) -> Self {
        let message = match cause.kind() {
            TransportErrorKind::AccessDenied => format!(
                "Access denied connecting to '{}': verify the account and password used \
                 for administration.",
                address
            ),
            TransportErrorKind::ConnectionRefused => format!(
                "Could not connect to '{}': the server is not running or not listening \
                 on that port.",
                address
            ),
            TransportErrorKind::UnknownHost => format!(
                "Could not resolve host of '{}': verify the hostname.",
                address
            ),
            TransportErrorKind::ConnectionLost => format!(
                "Lost connection to '{}' while executing an administrative command.",
                address
            ),
            TransportErrorKind::ReadOnly => format!(
                "Instance '{}' rejected a write because it is read-only.",
                address
            ),
            TransportErrorKind::Other => format!("Error executing command on '{}'.", address),
        };
        Self::new(AdminErrorKind::Connectivity, message).with_cause(cause)
    }

    /// Create a not-a-member error.
    pub fn not_member(address: &InstanceAddress, cluster: &str) -> Self {
        Self::new(
            AdminErrorKind::NotMember,
            format!(
                "The instance '{}' does not belong to the cluster '{}'.",
                address, cluster
            ),
        )
    }

    /// Create a no-quorum error.
    pub fn no_quorum(cluster: &str, operation: &str) -> Self {
        Self::new(
            AdminErrorKind::NoQuorum,
            format!(
                "There is no quorum to perform the operation: cluster '{}' has no quorum, \
                 {} is not possible. Restore quorum first (forceQuorumUsingPartitionOf).",
                cluster, operation
            ),
        )
    }

    /// Create a sync timeout error.
    pub fn sync_timeout(address: &InstanceAddress, timeout_secs: u64) -> Self {
        Self::new(
            AdminErrorKind::SyncTimeout,
            format!(
                "Timeout reached waiting for all received transactions to be applied on \
                 instance '{}' (timeout={}s).",
                address, timeout_secs
            ),
        )
    }

    /// Create a state-wait timeout error.
    pub fn state_timeout(address: &InstanceAddress, expected: &str) -> Self {
        Self::new(
            AdminErrorKind::StateTimeout,
            format!(
                "Timeout waiting for instance '{}' to reach state {}.",
                address, expected
            ),
        )
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AdminErrorKind::Internal, message)
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Whether the failure was detected before anything was changed.
    ///
    /// Argument, type and precondition failures are raised during
    /// validation only.
    pub fn is_pre_mutation(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Argument | ErrorCategory::Type | ErrorCategory::Precondition
        )
    }

    /// Transport error code, if this error came from a remote call.
    pub fn transport_code(&self) -> Option<u32> {
        self.cause.as_ref().map(|c| c.code)
    }
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category(), self.message)?;
        if let Some(ref cause) = self.cause {
            write!(f, " ({})", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<GatewayError> for AdminError {
    fn from(cause: GatewayError) -> Self {
        Self::new(AdminErrorKind::Connectivity, "Remote command failed.").with_cause(cause)
    }
}

impl From<MetadataError> for AdminError {
    fn from(e: MetadataError) -> Self {
        Self::new(AdminErrorKind::Metadata, e.to_string())
    }
}

/// Result type for orchestration operations
pub type AdminResult<T> = Result<T, AdminError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(AdminError::argument("x").category(), ErrorCategory::Argument);
        assert_eq!(AdminError::type_error("x").category(), ErrorCategory::Type);
        assert_eq!(
            AdminError::no_quorum("c", "addInstance").category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            AdminError::sync_timeout(&InstanceAddress::new("h", 1), 3).category(),
            ErrorCategory::StateTransition
        );
    }

    #[test]
    fn test_connectivity_messages_are_distinct() {
        let addr = InstanceAddress::new("h", 3306);
        let denied = AdminError::connectivity(&addr, GatewayError::access_denied("root"));
        let refused = AdminError::connectivity(&addr, GatewayError::connection_refused(&addr));
        assert_ne!(denied.message, refused.message);
        assert_eq!(denied.transport_code(), Some(1045));
        assert_eq!(refused.transport_code(), Some(2003));
    }

    #[test]
    fn test_display_includes_transport_error() {
        let addr = InstanceAddress::new("h", 3306);
        let err = AdminError::connectivity(&addr, GatewayError::connection_refused(&addr));
        let display = err.to_string();
        assert!(display.starts_with("ConnectivityError"));
        assert!(display.contains("MySQL Error 2003"));
    }

    #[test]
    fn test_pre_mutation() {
        assert!(AdminError::argument("x").is_pre_mutation());
        assert!(!AdminError::sync_timeout(&InstanceAddress::new("h", 1), 1).is_pre_mutation());
    }
}
