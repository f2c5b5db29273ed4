//! Inspection of an instance about to join a topology.

use crate::context::AdminContext;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::gateway::{GtidSet, ServerVersion, APPLIER_CHANNEL, RECOVERY_CHANNEL};
use crate::metadata::{self, TopologyMetadata};
use crate::quorum::{
    channels, check_identity_unique, gtid_state, local_group_state, server_identity, ChannelStatus,
    LocalGroupState, ServerIdentity,
};
use crate::topology::InstanceAddress;

/// Point-in-time state of a candidate instance.
#[derive(Debug, Clone)]
pub struct TargetInstance {
    pub address: InstanceAddress,
    pub identity: ServerIdentity,
    pub group: LocalGroupState,
    pub channels: Vec<ChannelStatus>,
    pub executed: GtidSet,
    /// Metadata copy found on the instance.
    pub metadata: Option<TopologyMetadata>,
    /// Why the instance's metadata copy could not be read, if it is corrupt.
    pub unreadable_metadata: Option<String>,
}

impl TargetInstance {
    pub fn inspect(ctx: &AdminContext, address: &InstanceAddress) -> AdminResult<Self> {
        let identity = server_identity(ctx, address)?;
        let group = local_group_state(ctx, address)?;
        let channels = channels(ctx, address)?;
        let (executed, _) = gtid_state(ctx, address)?;
        let (metadata, unreadable_metadata) = match metadata::read_from(ctx, address) {
            Ok(metadata) => (metadata, None),
            Err(e) if e.kind == AdminErrorKind::Metadata => (None, Some(e.message)),
            Err(e) => return Err(e),
        };
        Ok(Self {
            address: address.clone(),
            identity,
            group,
            channels,
            executed,
            metadata,
            unreadable_metadata,
        })
    }

    pub fn version(&self) -> ServerVersion {
        self.identity.version
    }

    /// Channels the group does not manage itself.
    pub fn foreign_channels(&self) -> Vec<&ChannelStatus> {
        self.channels
            .iter()
            .filter(|c| c.channel != RECOVERY_CHANNEL && c.channel != APPLIER_CHANNEL)
            .collect()
    }

    /// Fail unless the instance can join `cluster_name` as a new member.
    pub fn ensure_standalone(&self, metadata: &TopologyMetadata, cluster_name: &str) -> AdminResult<()> {
        if self.version() < ServerVersion::MINIMUM_SUPPORTED {
            return Err(AdminError::precondition(
                AdminErrorKind::IncompatibleVersion,
                format!(
                    "Unsupported server version {} on '{}': the minimum supported version is {}.",
                    self.version(),
                    self.address,
                    ServerVersion::MINIMUM_SUPPORTED
                ),
            ));
        }
        if let Some(record) = metadata.instance(&self.address) {
            let owner = metadata
                .cluster(&record.cluster_id)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            if owner == cluster_name {
                return Err(AdminError::precondition(
                    AdminErrorKind::AlreadyMember,
                    format!(
                        "The instance '{}' is already part of this cluster.",
                        self.address
                    ),
                ));
            }
            return Err(AdminError::precondition(
                AdminErrorKind::NotStandalone,
                format!(
                    "The instance '{}' is already part of cluster '{}'.",
                    self.address, owner
                ),
            ));
        }
        if let Some(ref reason) = self.unreadable_metadata {
            return Err(AdminError::precondition(
                AdminErrorKind::NotStandalone,
                format!(
                    "The instance '{}' holds topology metadata that cannot be read ({}). \
                     It may belong to another cluster; drop the metadata before adding it.",
                    self.address, reason
                ),
            ));
        }
        // A copy naming a cluster the topology still knows is stale: that
        // cluster's current metadata no longer lists the instance.
        if let Some(ref own) = self.metadata {
            if let Some(record) = own
                .instance(&self.address)
                .filter(|r| metadata.cluster(&r.cluster_id).is_none())
            {
                let owner = own
                    .cluster(&record.cluster_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                return Err(AdminError::precondition(
                    AdminErrorKind::NotStandalone,
                    format!(
                        "The instance '{}' is already part of another cluster ('{}').",
                        self.address, owner
                    ),
                ));
            }
        }
        if self.group.running {
            return Err(AdminError::precondition(
                AdminErrorKind::NotStandalone,
                format!(
                    "The instance '{}' is already part of another replication group ({}).",
                    self.address,
                    self.group
                        .group_name
                        .map(|g| g.to_string())
                        .unwrap_or_default()
                ),
            ));
        }
        if let Some(channel) = self.foreign_channels().first() {
            return Err(AdminError::precondition(
                AdminErrorKind::UnsupportedChannel,
                format!(
                    "The instance '{}' is running asynchronous (source-replica) replication on \
                     channel '{}'. Such a configuration is not supported; remove the channel first.",
                    self.address, channel.channel
                ),
            ));
        }
        check_identity_unique(metadata, &self.address, &self.identity)
    }
}
