//! Identity uniqueness across the whole topology.
//!
//! Checked against every instance the metadata knows, reachable or not.

use uuid::Uuid;

use super::probe::ServerIdentity;
use crate::errors::{AdminError, AdminErrorKind, AdminResult};
use crate::metadata::TopologyMetadata;
use crate::topology::InstanceAddress;

/// Fail if another registered instance uses the server id or UUID of
/// `address`.
pub fn check_identity_unique(
    metadata: &TopologyMetadata,
    address: &InstanceAddress,
    identity: &ServerIdentity,
) -> AdminResult<()> {
    for other in metadata.instances.iter().filter(|i| i.address != *address) {
        if other.server_id == identity.server_id {
            return Err(AdminError::precondition(
                AdminErrorKind::DuplicateServerId,
                format!(
                    "Invalid server_id '{}' for instance '{}': the value is already used by \
                     instance '{}'. The server_id must be unique in the topology.",
                    identity.server_id, address, other.address
                ),
            ));
        }
        if other.server_uuid == identity.server_uuid {
            return Err(AdminError::precondition(
                AdminErrorKind::DuplicateServerUuid,
                format!(
                    "Cannot add an instance with the same server UUID ({}) of an active member \
                     of the topology: '{}'. Please change the server UUID of the instance to add.",
                    identity.server_uuid, other.address
                ),
            ));
        }
    }
    Ok(())
}

/// Fail if `label` is already used by another instance of the cluster.
pub fn check_label_unique(
    metadata: &TopologyMetadata,
    cluster_id: &Uuid,
    label: &str,
    except: Option<&InstanceAddress>,
) -> AdminResult<()> {
    let taken = metadata
        .instances
        .iter()
        .filter(|i| i.cluster_id == *cluster_id && Some(&i.address) != except)
        .find(|i| i.label == label);
    match taken {
        Some(other) => Err(AdminError::precondition(
            AdminErrorKind::DuplicateLabel,
            format!(
                "An instance with label '{}' is already part of this cluster ('{}').",
                label, other.address
            ),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::gateway::ServerVersion;
    use crate::metadata::InstanceRecord;

    fn record(cluster_id: Uuid, port: u16, server_id: u32, uuid: Uuid) -> InstanceRecord {
        InstanceRecord {
            cluster_id,
            address: InstanceAddress::new("h", port),
            server_uuid: uuid,
            server_id,
            label: format!("h:{}", port),
            cert_subject: None,
            replication_account: None,
            read_replica: None,
            joined_at: Utc::now(),
        }
    }

    fn identity(server_id: u32, uuid: Uuid) -> ServerIdentity {
        ServerIdentity {
            server_uuid: uuid,
            server_id,
            version: ServerVersion::new(8, 0, 35),
            super_read_only: false,
        }
    }

    #[test]
    fn test_duplicates_rejected() {
        let cluster = Uuid::new_v4();
        let taken = Uuid::new_v4();
        let mut md = TopologyMetadata::new();
        md.instances.push(record(cluster, 3310, 1, taken));

        let addr = InstanceAddress::new("h", 3320);
        let err = check_identity_unique(&md, &addr, &identity(1, Uuid::new_v4())).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::DuplicateServerId);
        let err = check_identity_unique(&md, &addr, &identity(2, taken)).unwrap_err();
        assert_eq!(err.kind, AdminErrorKind::DuplicateServerUuid);
        assert!(check_identity_unique(&md, &addr, &identity(2, Uuid::new_v4())).is_ok());
    }

    #[test]
    fn test_same_address_is_not_a_duplicate() {
        let cluster = Uuid::new_v4();
        let uuid = Uuid::new_v4();
        let mut md = TopologyMetadata::new();
        md.instances.push(record(cluster, 3310, 1, uuid));
        let addr = InstanceAddress::new("h", 3310);
        assert!(check_identity_unique(&md, &addr, &identity(1, uuid)).is_ok());
    }

    #[test]
    fn test_label_scope_is_the_cluster() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut md = TopologyMetadata::new();
        md.instances.push(record(a, 3310, 1, Uuid::new_v4()));
        assert!(check_label_unique(&md, &a, "h:3310", None).is_err());
        assert!(check_label_unique(&md, &b, "h:3310", None).is_ok());
        let own = InstanceAddress::new("h", 3310);
        assert!(check_label_unique(&md, &a, "h:3310", Some(&own)).is_ok());
    }
}
