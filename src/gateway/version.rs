//! Server versions and the capabilities they gate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::GatewayError;

/// `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    /// Oldest version the orchestrator manages.
    pub const MINIMUM_SUPPORTED: ServerVersion = ServerVersion::new(8, 0, 11);
    /// First version with the clone plugin.
    pub const CLONE: ServerVersion = ServerVersion::new(8, 0, 17);
    /// First version reporting applier worker threads.
    pub const APPLIER_WORKER_THREADS: ServerVersion = ServerVersion::new(8, 0, 23);
    /// First version with the MYSQL communication stack.
    pub const MYSQL_COMMUNICATION_STACK: ServerVersion = ServerVersion::new(8, 0, 27);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn supports_clone(&self) -> bool {
        *self >= Self::CLONE
    }

    pub fn reports_applier_worker_threads(&self) -> bool {
        *self >= Self::APPLIER_WORKER_THREADS
    }

    pub fn supports_mysql_communication_stack(&self) -> bool {
        *self >= Self::MYSQL_COMMUNICATION_STACK
    }

    /// Group protocol version spoken by this server.
    pub fn protocol_version(&self) -> String {
        if *self >= Self::new(8, 0, 27) {
            "8.0.27".to_string()
        } else if *self >= Self::new(8, 0, 16) {
            "8.0.16".to_string()
        } else {
            "5.7.14".to_string()
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ServerVersion {
    type Err = GatewayError;

    /// Parses `8.0.36` and suffixed forms such as `8.0.36-log`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.split(|c: char| c == '-' || c == ' ').next().unwrap_or("");
        let mut parts = core.split('.');
        let mut next = || -> Result<u32, GatewayError> {
            parts
                .next()
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| GatewayError::unexpected_result(format!("bad version '{}'", s)))
        };
        Ok(Self::new(next()?, next()?, next()?))
    }
}

impl TryFrom<String> for ServerVersion {
    type Error = GatewayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ServerVersion> for String {
    fn from(value: ServerVersion) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_order() {
        let v: ServerVersion = "8.0.36-log".parse().unwrap();
        assert_eq!(v, ServerVersion::new(8, 0, 36));
        assert!(v > ServerVersion::CLONE);
        assert!("8.0".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn test_capabilities() {
        let old = ServerVersion::new(8, 0, 16);
        assert!(!old.supports_clone());
        assert!(!old.reports_applier_worker_threads());
        let new = ServerVersion::new(8, 0, 30);
        assert!(new.supports_clone());
        assert!(new.reports_applier_worker_threads());
        assert_eq!(new.protocol_version(), "8.0.27");
    }
}
