//! Replication accounts
//!
//! Every member gets its own account for the traffic it receives:
//! - `mysql_innodb_cluster_<server_id>` for group recovery
//! - `mysql_innodb_replica_<server_id>` for a Read-Replica channel
//! - `mysql_innodb_cs_<server_id>` for the inbound ClusterSet channel
//!
//! Accounts are created on the writable member that owns the metadata, so
//! they replicate to every instance that may serve as a donor or source.

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::changes::ChangeSet;
use crate::errors::AdminResult;
use crate::gateway::{AccountSpec, Statement};
use crate::metadata::ClusterRecord;
use crate::topology::InstanceAddress;

const PASSWORD_LEN: usize = 32;

pub fn cluster_account(server_id: u32) -> String {
    format!("mysql_innodb_cluster_{}", server_id)
}

pub fn replica_account(server_id: u32) -> String {
    format!("mysql_innodb_replica_{}", server_id)
}

pub fn clusterset_account(server_id: u32) -> String {
    format!("mysql_innodb_cs_{}", server_id)
}

pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Account definition following the cluster's member authentication type.
pub fn account_spec(user: String, cluster: &ClusterRecord, cert_subject: Option<&str>) -> AccountSpec {
    let auth = cluster.member_auth_type;
    AccountSpec {
        user,
        host: "%".to_string(),
        password: auth.requires_password().then(generate_password),
        cert_issuer: if auth.requires_issuer() {
            cluster.cert_issuer.clone()
        } else {
            None
        },
        cert_subject: if auth.requires_subject() {
            cert_subject.map(str::to_string)
        } else {
            None
        },
    }
}

/// Create `spec` on `target`, dropping any leftover with the same name
/// first, and register the drop for revert.
pub fn create_account(
    changes: &mut ChangeSet<'_>,
    target: &InstanceAddress,
    spec: &AccountSpec,
) -> AdminResult<()> {
    let drop = Statement::DropAccount {
        user: spec.user.clone(),
        host: spec.host.clone(),
    };
    changes.apply(target, drop.clone())?;
    changes.apply_reversible(target, Statement::CreateAccount(spec.clone()), drop)?;
    Ok(())
}

/// Drop an account, ignoring one that does not exist.
pub fn drop_account(changes: &mut ChangeSet<'_>, target: &InstanceAddress, user: &str) -> AdminResult<()> {
    changes.apply(
        target,
        Statement::DropAccount {
            user: user.to_string(),
            host: "%".to_string(),
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::topology::{MemberAuthType, SslMode, TopologyMode};

    fn cluster(auth: MemberAuthType) -> ClusterRecord {
        ClusterRecord {
            cluster_id: Uuid::new_v4(),
            name: "c".to_string(),
            group_name: Uuid::new_v4(),
            topology_mode: TopologyMode::SinglePrimary,
            ssl_mode: SslMode::Required,
            member_auth_type: auth,
            cert_issuer: Some("/CN=ca".to_string()),
            disable_clone: false,
            clusterset_id: None,
            created_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(cluster_account(7), "mysql_innodb_cluster_7");
        assert_eq!(replica_account(7), "mysql_innodb_replica_7");
        assert_eq!(clusterset_account(7), "mysql_innodb_cs_7");
    }

    #[test]
    fn test_passwords_differ() {
        let a = generate_password();
        assert_eq!(a.len(), PASSWORD_LEN);
        assert_ne!(a, generate_password());
    }

    #[test]
    fn test_spec_follows_auth_type() {
        let spec = account_spec("u".into(), &cluster(MemberAuthType::Password), Some("/CN=x"));
        assert!(spec.password.is_some());
        assert!(spec.cert_issuer.is_none());
        assert!(spec.cert_subject.is_none());

        let spec = account_spec("u".into(), &cluster(MemberAuthType::CertSubject), Some("/CN=x"));
        assert!(spec.password.is_none());
        assert_eq!(spec.cert_issuer.as_deref(), Some("/CN=ca"));
        assert_eq!(spec.cert_subject.as_deref(), Some("/CN=x"));
    }
}
