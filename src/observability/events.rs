//! Orchestration lifecycle events
//!
//! Events are explicit and typed. Operation begin/complete/failed lines
//! come from [`ObservationScope`](super::ObservationScope); the events
//! below mark what happens inside an operation.

use std::fmt;

use super::logger::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// CLI configuration loaded
    ConfigLoaded,
    /// Simulated fleet loaded from disk
    FleetLoaded,
    /// Simulated fleet written back to disk
    FleetSaved,

    /// Remote statement issued
    StatementExecuted,
    /// Mutating statement recorded instead of executed
    StatementPlanned,
    /// Metadata document written
    MetadataWritten,

    /// Group lost its majority
    QuorumLost,
    /// Membership forced from a partition
    QuorumForced,
    /// Provisioning method chosen for a joining member
    ProvisioningSelected,
    /// Member reached ONLINE
    MemberOnline,
    /// Member left the group
    MemberRemoved,
    /// Primary changed
    PrimaryChanged,
    /// Single/multi-primary mode switched
    ModeSwitched,

    /// Undo of applied changes started
    RollbackBegin,
    /// Undo finished
    RollbackComplete,
    /// An undo step failed
    RollbackStepFailed,

    /// Read-Replica source list reconfigured
    SourceReconfigured,
    /// ClusterSet channel rebuilt from scratch
    ChannelRebuilt,
    /// ClusterSet channel updated in place
    ChannelUpdated,
    /// Replica cluster added to a ClusterSet
    ReplicaClusterCreated,
    /// Cluster removed from a ClusterSet
    ClusterRemoved,
    /// ClusterSet primary switched by consensus
    ClusterSetSwitchover,
    /// ClusterSet primary switched without the old primary
    ClusterSetFailover,
    /// Cluster marked invalidated
    ClusterInvalidated,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::FleetLoaded => "FLEET_LOADED",
            Event::FleetSaved => "FLEET_SAVED",
            Event::StatementExecuted => "STATEMENT_EXECUTED",
            Event::StatementPlanned => "STATEMENT_PLANNED",
            Event::MetadataWritten => "METADATA_WRITTEN",
            Event::QuorumLost => "QUORUM_LOST",
            Event::QuorumForced => "QUORUM_FORCED",
            Event::ProvisioningSelected => "PROVISIONING_SELECTED",
            Event::MemberOnline => "MEMBER_ONLINE",
            Event::MemberRemoved => "MEMBER_REMOVED",
            Event::PrimaryChanged => "PRIMARY_CHANGED",
            Event::ModeSwitched => "MODE_SWITCHED",
            Event::RollbackBegin => "ROLLBACK_BEGIN",
            Event::RollbackComplete => "ROLLBACK_COMPLETE",
            Event::RollbackStepFailed => "ROLLBACK_STEP_FAILED",
            Event::SourceReconfigured => "SOURCE_RECONFIGURED",
            Event::ChannelRebuilt => "CHANNEL_REBUILT",
            Event::ChannelUpdated => "CHANNEL_UPDATED",
            Event::ReplicaClusterCreated => "REPLICA_CLUSTER_CREATED",
            Event::ClusterRemoved => "CLUSTER_REMOVED",
            Event::ClusterSetSwitchover => "CLUSTERSET_SWITCHOVER",
            Event::ClusterSetFailover => "CLUSTERSET_FAILOVER",
            Event::ClusterInvalidated => "CLUSTER_INVALIDATED",
        }
    }

    /// Severity the event is logged at.
    pub fn severity(&self) -> Severity {
        match self {
            Event::StatementExecuted | Event::StatementPlanned => Severity::Trace,
            Event::QuorumLost
            | Event::QuorumForced
            | Event::ClusterSetFailover
            | Event::ClusterInvalidated
            | Event::RollbackBegin => Severity::Warn,
            Event::RollbackStepFailed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::RollbackComplete.as_str(), "ROLLBACK_COMPLETE");
        assert_eq!(Event::ChannelRebuilt.to_string(), "CHANNEL_REBUILT");
    }

    #[test]
    fn test_event_severity() {
        assert_eq!(Event::StatementExecuted.severity(), Severity::Trace);
        assert_eq!(Event::QuorumLost.severity(), Severity::Warn);
        assert_eq!(Event::RollbackStepFailed.severity(), Severity::Error);
        assert_eq!(Event::PrimaryChanged.severity(), Severity::Info);
    }
}
