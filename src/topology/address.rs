//! Instance addresses
//!
//! Every member is identified by the `host:port` it is reached on. IPv6
//! hosts are written in brackets (`[::1]:3306`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AdminError;

/// Network address of one server instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceAddress {
    host: String,
    port: u16,
}

impl InstanceAddress {
    /// Create an address from parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address used by the group communication layer.
    ///
    /// Group traffic runs on `port * 10 + 1` while that fits, otherwise
    /// `port - 10000`.
    pub fn local_address(&self) -> InstanceAddress {
        let port = u32::from(self.port) * 10 + 1;
        let port = if port <= u32::from(u16::MAX) {
            port as u16
        } else {
            self.port.saturating_sub(10000)
        };
        InstanceAddress::new(self.host.clone(), port)
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for InstanceAddress {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                AdminError::argument(format!("Invalid address '{}': unterminated IPv6 host", s))
            })?;
            let port = tail.strip_prefix(':').ok_or_else(|| {
                AdminError::argument(format!("Invalid address '{}': port is missing", s))
            })?;
            (host, port)
        } else {
            s.rsplit_once(':').ok_or_else(|| {
                AdminError::argument(format!("Invalid address '{}': expected host:port", s))
            })?
        };

        if host.is_empty() {
            return Err(AdminError::argument(format!(
                "Invalid address '{}': host is empty",
                s
            )));
        }

        let port: u16 = port.parse().map_err(|_| {
            AdminError::argument(format!("Invalid address '{}': bad port '{}'", s, port))
        })?;
        if port == 0 {
            return Err(AdminError::argument(format!(
                "Invalid address '{}': port must be greater than 0",
                s
            )));
        }

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for InstanceAddress {
    type Error = AdminError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstanceAddress> for String {
    fn from(value: InstanceAddress) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: InstanceAddress = "db1.example:3306".parse().unwrap();
        assert_eq!(addr.host(), "db1.example");
        assert_eq!(addr.port(), 3306);
        assert_eq!(addr.to_string(), "db1.example:3306");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr: InstanceAddress = "[::1]:3310".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:3310");
    }

    #[test]
    fn test_rejects_missing_port() {
        assert!("localhost".parse::<InstanceAddress>().is_err());
        assert!("localhost:".parse::<InstanceAddress>().is_err());
        assert!(":3306".parse::<InstanceAddress>().is_err());
        assert!("localhost:0".parse::<InstanceAddress>().is_err());
    }

    #[test]
    fn test_local_address() {
        let addr = InstanceAddress::new("h", 3306);
        assert_eq!(addr.local_address().port(), 33061);
        let high = InstanceAddress::new("h", 40000);
        assert_eq!(high.local_address().port(), 30000);
    }

    #[test]
    fn test_serde_as_string() {
        let addr = InstanceAddress::new("h", 3306);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"h:3306\"");
        let back: InstanceAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
