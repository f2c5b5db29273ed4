//! Typed operation options
//!
//! Every operation takes its options as a JSON object parsed into a struct
//! with named, range-checked fields. Parsing fails with:
//! - an argument error for unknown keys or out-of-range values
//! - a type error for values of the wrong JSON type

mod cluster;
mod clusterset;
mod settings;

use std::str::FromStr;
use std::time::Duration;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::errors::{AdminError, AdminResult};

pub use cluster::{
    AddInstanceOptions, AddReplicaInstanceOptions, CreateClusterOptions, DissolveOptions,
    InstanceSelection, RebootOptions, RejoinInstanceOptions, RemoveInstanceOptions, RescanOptions,
    SetPrimaryInstanceOptions, StatusOptions,
};
pub use clusterset::{
    ClusterSetChannelOptions, CreateClusterSetOptions, CreateReplicaClusterOptions,
    ForcePrimaryClusterOptions, RejoinClusterOptions, RemoveClusterOptions,
    SetPrimaryClusterOptions, CHANNEL_OPTION_KEYS,
};
pub use settings::{ClusterSetting, GroupVariable, InstanceSetting, GROUP_OPTIONS};

/// Options map of one operation.
pub trait OperationOptions: DeserializeOwned + Default {
    /// Operation name used in error messages.
    const OPERATION: &'static str;
    /// Accepted keys.
    const KEYS: &'static [&'static str];

    fn accepts(key: &str) -> bool {
        Self::KEYS.contains(&key)
    }

    /// Range and cross-field checks run after parsing.
    fn validate(&self) -> AdminResult<()> {
        Ok(())
    }

    /// Parse an options map; absent or `null` means all defaults.
    fn from_json(value: Option<&Value>) -> AdminResult<Self> {
        let map = match value {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AdminError::type_error(format!(
                    "{}: options are expected to be a map.",
                    Self::OPERATION
                )))
            }
        };
        let unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !Self::accepts(k))
            .collect();
        if !unknown.is_empty() {
            return Err(AdminError::argument(format!(
                "Invalid options for {}: {}",
                Self::OPERATION,
                unknown.join(", ")
            )));
        }
        let parsed: Self = serde_json::from_value(Value::Object(map.clone()))
            .map_err(|e| parse_error(Self::OPERATION, &e))?;
        parsed.validate()?;
        Ok(parsed)
    }
}

/// Map a serde failure onto the error taxonomy.
fn parse_error(operation: &str, error: &serde_json::Error) -> AdminError {
    let text = error.to_string();
    if text.starts_with("invalid type") {
        AdminError::type_error(format!("{}: option value has the wrong type: {}", operation, text))
    } else {
        AdminError::argument(format!("{}: {}", operation, text))
    }
}

/// Enumerated option given as a case-insensitive string.
pub(crate) fn token<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr<Err = AdminError>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| s.parse::<T>().map_err(|e| D::Error::custom(e.message)))
        .transpose()
}

/// Keeps an explicit `null` apart from an absent key: absent is `None`,
/// `null` is `Some(None)`.
pub(crate) fn explicit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Seconds to a timeout; `None` stays unbounded.
pub fn timeout_from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.map(Duration::from_secs)
}

pub(crate) fn check_range(option: &str, value: u64, min: u64, max: u64) -> AdminResult<()> {
    if value < min || value > max {
        return Err(AdminError::argument(format!(
            "Invalid value for option '{}': {}. Allowed range is {}..{}.",
            option, value, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::ErrorCategory;

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        #[serde(default)]
        count: Option<u64>,
        #[serde(default, deserialize_with = "explicit")]
        bind: Option<Option<String>>,
    }

    impl OperationOptions for Sample {
        const OPERATION: &'static str = "sample";
        const KEYS: &'static [&'static str] = &["count", "bind"];
    }

    #[test]
    fn test_unknown_key_is_argument_error() {
        let err = Sample::from_json(Some(&json!({"cuont": 1}))).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
        assert!(err.message.contains("cuont"));
    }

    #[test]
    fn test_wrong_type_is_type_error() {
        let err = Sample::from_json(Some(&json!({"count": "three"}))).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Type);
        let err = Sample::from_json(Some(&json!([1, 2]))).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Type);
    }

    #[test]
    fn test_negative_is_argument_error() {
        let err = Sample::from_json(Some(&json!({"count": -1}))).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Argument);
    }

    #[test]
    fn test_explicit_null_kept() {
        let absent = Sample::from_json(Some(&json!({}))).unwrap();
        assert_eq!(absent.bind, None);
        let null = Sample::from_json(Some(&json!({"bind": null}))).unwrap();
        assert_eq!(null.bind, Some(None));
        let set = Sample::from_json(Some(&json!({"bind": "10.0.0.1"}))).unwrap();
        assert_eq!(set.bind, Some(Some("10.0.0.1".to_string())));
    }
}
