//! Member authentication settings.

use crate::errors::{AdminError, AdminResult};
use crate::metadata::{ClusterRecord, InstanceRecord};
use crate::options::CreateClusterOptions;
use crate::topology::{MemberAuthType, SslMode};

/// Auth type, SSL mode and issuer a new cluster is created with.
pub fn resolve_create_auth(
    options: &CreateClusterOptions,
) -> AdminResult<(MemberAuthType, SslMode, Option<String>)> {
    let auth = options.member_auth_type.unwrap_or_default();
    let uses_certs = auth.uses_certificates()
        || options.cert_issuer.is_some()
        || options.cert_subject.is_some();

    if options.adopt_from_gr && uses_certs {
        return Err(AdminError::argument(
            "Cannot use memberAuthType, certIssuer or certSubject if adoptFromGR is set to true.",
        ));
    }
    let ssl_mode = options.ssl_mode.unwrap_or_default();
    if auth.uses_certificates() && ssl_mode == SslMode::Disabled {
        return Err(AdminError::argument(format!(
            "Option 'memberAuthType' cannot be '{}' when 'sslMode' is DISABLED.",
            auth
        )));
    }
    if auth.requires_issuer() && options.cert_issuer.as_deref().map_or(true, str::is_empty) {
        return Err(AdminError::argument(format!(
            "The 'certIssuer' option is required when 'memberAuthType' is '{}'.",
            auth
        )));
    }
    if !auth.uses_certificates() && options.cert_issuer.is_some() {
        return Err(AdminError::argument(
            "The 'certIssuer' option can only be used with a certificate based 'memberAuthType'.",
        ));
    }
    check_member_subject(auth, options.cert_subject.as_deref())?;
    Ok((auth, ssl_mode, options.cert_issuer.clone()))
}

/// Certificate subject rule for a member joining a cluster with `auth`.
pub fn check_member_subject(auth: MemberAuthType, cert_subject: Option<&str>) -> AdminResult<()> {
    match cert_subject {
        None if auth.requires_subject() => Err(AdminError::argument(format!(
            "The 'certSubject' option is required when the cluster's 'memberAuthType' is '{}'.",
            auth
        ))),
        Some(_) if !auth.requires_subject() => Err(AdminError::argument(format!(
            "The 'certSubject' option can only be used when the cluster's 'memberAuthType' is \
             CERT_SUBJECT or CERT_SUBJECT_PASSWORD (current: '{}').",
            auth
        ))),
        _ => Ok(()),
    }
}

/// Status warning for a member whose certificate settings cannot work.
pub fn member_auth_warning(cluster: &ClusterRecord, member: &InstanceRecord) -> Option<String> {
    let auth = cluster.member_auth_type;
    if auth.requires_issuer() && cluster.cert_issuer.as_deref().map_or(true, str::is_empty) {
        return Some(format!(
            "WARNING: memberAuthType is '{}' but the cluster has no certIssuer configured; \
             other members will not be able to connect to this instance.",
            auth
        ));
    }
    if auth.requires_subject() && member.cert_subject.as_deref().map_or(true, str::is_empty) {
        return Some(format!(
            "WARNING: memberAuthType is '{}' but the instance has no certSubject configured; \
             other members will not be able to connect to this instance.",
            auth
        ));
    }
    None
}
