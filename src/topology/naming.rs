//! Identifier validation
//!
//! Cluster names and ClusterSet domain names are alphanumerics plus `_-.:`,
//! not starting with a digit, at most 63 chars. Member labels use the same
//! characters but may start with a digit, so a `host:port` label such as
//! `127.0.0.1:3306` is accepted.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{AdminError, AdminResult};

/// Longest identifier accepted.
pub const MAX_IDENTIFIER_LEN: usize = 63;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_.:\-][A-Za-z0-9_.:\-]*$").expect("identifier pattern is valid")
    })
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("label pattern is valid"))
}

fn check_length(what: &str, value: &str) -> AdminResult<()> {
    if value.is_empty() {
        return Err(AdminError::argument(format!("The {} cannot be empty.", what)));
    }
    if value.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(AdminError::argument(format!(
            "The {} can not be greater than {} characters.",
            what, MAX_IDENTIFIER_LEN
        )));
    }
    Ok(())
}

/// Validate a cluster (or ClusterSet domain) name.
pub fn validate_cluster_name(name: &str) -> AdminResult<()> {
    let what = "Cluster name";
    check_length(what, name)?;
    if !identifier_pattern().is_match(name) {
        return Err(AdminError::argument(format!(
            "The {} '{}' cannot start with a digit and may only contain alphanumerics \
             or the '_', '.', '-', ':' characters.",
            what, name
        )));
    }
    Ok(())
}

/// Validate a member label.
pub fn validate_label(label: &str) -> AdminResult<()> {
    check_length("label", label)?;
    if !label_pattern().is_match(label) {
        return Err(AdminError::argument(format!(
            "The label '{}' may only contain alphanumerics or the '_', '.', '-', ':' characters.",
            label
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn test_valid_names() {
        for name in ["prod", "_x", "a-b.c:d", "Cluster_01", ".hidden", "-dash"] {
            assert!(validate_cluster_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "1cluster", "has space", "semi;colon", "ünicode"] {
            let err = validate_cluster_name(name).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Argument, "{}", name);
        }
    }

    #[test]
    fn test_labels_may_start_with_a_digit() {
        for label in ["127.0.0.1:3306", "10.0.0.7:33060", "db-1.example.com:3306", "second"] {
            assert!(validate_label(label).is_ok(), "{}", label);
        }
        assert!(validate_cluster_name("127.0.0.1:3306").is_err());
        for label in ["", "has space", "a/b", "[::1]:3306"] {
            let err = validate_label(label).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Argument, "{}", label);
        }
    }

    #[test]
    fn test_length_limit() {
        let ok = "a".repeat(MAX_IDENTIFIER_LEN);
        let too_long = "a".repeat(MAX_IDENTIFIER_LEN + 1);
        assert!(validate_label(&ok).is_ok());
        assert!(validate_label(&too_long).is_err());
    }
}
