//! Topology enums
//!
//! Each enum renders to the exact token used in status output and option
//! values, and parses case-insensitively from operator input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::address::InstanceAddress;
use crate::errors::AdminError;

/// Role of a group member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Primary,
    Secondary,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "PRIMARY",
            Self::Secondary => "SECONDARY",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(Self::Primary),
            "SECONDARY" => Ok(Self::Secondary),
            other => Err(AdminError::argument(format!("Unknown member role '{}'", other))),
        }
    }
}

/// Live state of a member as seen by the group.
///
/// `Missing` is never reported by the group itself: it marks a member that
/// is in the metadata but absent from the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberState {
    #[serde(rename = "ONLINE")]
    Online,
    #[serde(rename = "RECOVERING")]
    Recovering,
    #[serde(rename = "OFFLINE")]
    Offline,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "UNREACHABLE")]
    Unreachable,
    #[serde(rename = "(MISSING)")]
    Missing,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Recovering => "RECOVERING",
            Self::Offline => "OFFLINE",
            Self::Error => "ERROR",
            Self::Unreachable => "UNREACHABLE",
            Self::Missing => "(MISSING)",
        }
    }

    /// Whether this state counts toward quorum.
    pub fn counts_for_quorum(&self) -> bool {
        matches!(self, Self::Online | Self::Recovering)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberState {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(Self::Online),
            "RECOVERING" => Ok(Self::Recovering),
            "OFFLINE" => Ok(Self::Offline),
            "ERROR" => Ok(Self::Error),
            "UNREACHABLE" => Ok(Self::Unreachable),
            "(MISSING)" | "MISSING" => Ok(Self::Missing),
            other => Err(AdminError::argument(format!("Unknown member state '{}'", other))),
        }
    }
}

/// Writer topology of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyMode {
    SinglePrimary,
    MultiPrimary,
}

impl TopologyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePrimary => "Single-Primary",
            Self::MultiPrimary => "Multi-Primary",
        }
    }

    pub fn is_single_primary(&self) -> bool {
        matches!(self, Self::SinglePrimary)
    }
}

impl fmt::Display for TopologyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport security required between members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SslMode {
    Disabled,
    Required,
    VerifyCa,
    VerifyIdentity,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::Required => "REQUIRED",
            Self::VerifyCa => "VERIFY_CA",
            Self::VerifyIdentity => "VERIFY_IDENTITY",
        }
    }
}

impl Default for SslMode {
    fn default() -> Self {
        Self::Required
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DISABLED" => Ok(Self::Disabled),
            "REQUIRED" => Ok(Self::Required),
            "VERIFY_CA" => Ok(Self::VerifyCa),
            "VERIFY_IDENTITY" => Ok(Self::VerifyIdentity),
            other => Err(AdminError::argument(format!(
                "Invalid value for sslMode, string value cannot be '{}'.",
                other
            ))),
        }
    }
}

/// How members authenticate to each other on the recovery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberAuthType {
    Password,
    CertIssuer,
    CertSubject,
    CertIssuerPassword,
    CertSubjectPassword,
}

impl MemberAuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "PASSWORD",
            Self::CertIssuer => "CERT_ISSUER",
            Self::CertSubject => "CERT_SUBJECT",
            Self::CertIssuerPassword => "CERT_ISSUER_PASSWORD",
            Self::CertSubjectPassword => "CERT_SUBJECT_PASSWORD",
        }
    }

    /// Whether any certificate option is involved.
    pub fn uses_certificates(&self) -> bool {
        !matches!(self, Self::Password)
    }

    /// Whether the cluster-wide issuer must be configured.
    pub fn requires_issuer(&self) -> bool {
        self.uses_certificates()
    }

    /// Whether every member needs its own certificate subject.
    pub fn requires_subject(&self) -> bool {
        matches!(self, Self::CertSubject | Self::CertSubjectPassword)
    }

    /// Whether the recovery account also carries a password.
    pub fn requires_password(&self) -> bool {
        matches!(
            self,
            Self::Password | Self::CertIssuerPassword | Self::CertSubjectPassword
        )
    }
}

impl Default for MemberAuthType {
    fn default() -> Self {
        Self::Password
    }
}

impl fmt::Display for MemberAuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberAuthType {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASSWORD" => Ok(Self::Password),
            "CERT_ISSUER" => Ok(Self::CertIssuer),
            "CERT_SUBJECT" => Ok(Self::CertSubject),
            "CERT_ISSUER_PASSWORD" => Ok(Self::CertIssuerPassword),
            "CERT_SUBJECT_PASSWORD" => Ok(Self::CertSubjectPassword),
            other => Err(AdminError::argument(format!(
                "Invalid value for 'memberAuthType' option. Supported values: PASSWORD, \
                 CERT_ISSUER, CERT_SUBJECT, CERT_ISSUER_PASSWORD, CERT_SUBJECT_PASSWORD (got '{}').",
                other
            ))),
        }
    }
}

/// How a joining member gets its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMethod {
    Incremental,
    Clone,
    Auto,
}

impl RecoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Clone => "clone",
            Self::Auto => "auto",
        }
    }
}

impl Default for RecoveryMethod {
    fn default() -> Self {
        Self::Auto
    }
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryMethod {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "incremental" => Ok(Self::Incremental),
            "clone" => Ok(Self::Clone),
            "auto" => Ok(Self::Auto),
            other => Err(AdminError::argument(format!(
                "Invalid value for option recoveryMethod: '{}'. Allowed values: auto, clone, incremental.",
                other
            ))),
        }
    }
}

/// Source policy of a Read-Replica.
///
/// Serialized as `"primary"`, `"secondary"` or an array of addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplicationSources {
    Policy(SourcePolicyToken),
    List(Vec<InstanceAddress>),
}

/// Token form of [`ReplicationSources`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePolicyToken {
    Primary,
    Secondary,
}

impl ReplicationSources {
    /// Follow the current group primary.
    pub fn primary() -> Self {
        Self::Policy(SourcePolicyToken::Primary)
    }

    /// Follow any ONLINE secondary.
    pub fn secondary() -> Self {
        Self::Policy(SourcePolicyToken::Secondary)
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Policy(SourcePolicyToken::Primary))
    }

    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::Policy(SourcePolicyToken::Secondary))
    }

    /// Explicit candidate list, if any.
    pub fn as_list(&self) -> Option<&[InstanceAddress]> {
        match self {
            Self::List(list) => Some(list),
            Self::Policy(_) => None,
        }
    }
}

impl Default for ReplicationSources {
    fn default() -> Self {
        Self::primary()
    }
}

impl fmt::Display for ReplicationSources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy(SourcePolicyToken::Primary) => f.write_str("PRIMARY"),
            Self::Policy(SourcePolicyToken::Secondary) => f.write_str("SECONDARY"),
            Self::List(list) => {
                let parts: Vec<String> = list.iter().map(|a| a.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_states() {
        assert!(MemberState::Online.counts_for_quorum());
        assert!(MemberState::Recovering.counts_for_quorum());
        assert!(!MemberState::Unreachable.counts_for_quorum());
        assert!(!MemberState::Missing.counts_for_quorum());
    }

    #[test]
    fn test_auth_type_requirements() {
        assert!(!MemberAuthType::Password.uses_certificates());
        assert!(MemberAuthType::CertIssuer.requires_issuer());
        assert!(!MemberAuthType::CertIssuer.requires_subject());
        assert!(MemberAuthType::CertSubjectPassword.requires_subject());
        assert!(MemberAuthType::CertSubjectPassword.requires_password());
        assert!(!MemberAuthType::CertSubject.requires_password());
        assert_eq!(
            "cert_issuer_password".parse::<MemberAuthType>().unwrap(),
            MemberAuthType::CertIssuerPassword
        );
    }

    #[test]
    fn test_replication_sources_json_forms() {
        let primary: ReplicationSources = serde_json::from_str("\"primary\"").unwrap();
        assert!(primary.is_primary());

        let secondary: ReplicationSources = serde_json::from_str("\"secondary\"").unwrap();
        assert!(secondary.is_secondary());

        let list: ReplicationSources =
            serde_json::from_str("[\"a:3306\", \"b:3306\"]").unwrap();
        assert_eq!(list.as_list().unwrap().len(), 2);

        assert!(serde_json::from_str::<ReplicationSources>("\"tertiary\"").is_err());
        assert!(serde_json::from_str::<ReplicationSources>("42").is_err());
    }

    #[test]
    fn test_missing_state_token() {
        assert_eq!(MemberState::Missing.to_string(), "(MISSING)");
        assert_eq!(
            serde_json::to_string(&MemberState::Missing).unwrap(),
            "\"(MISSING)\""
        );
    }
}
