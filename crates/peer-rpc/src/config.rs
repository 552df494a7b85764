//! Endpoint configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time an `act` call waits for its response.
pub const DEFAULT_ACT_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoint configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Timeout for calls that do not set their own (default: 30s)
    #[serde(with = "humantime_serde")]
    pub default_act_timeout: Duration,
    /// Maximum outstanding calls; unlimited when `None`
    pub max_pending: Option<usize>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            default_act_timeout: DEFAULT_ACT_TIMEOUT,
            max_pending: None,
        }
    }
}

impl EndpointConfig {
    /// Config with a different default timeout.
    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            default_act_timeout: timeout,
            ..Self::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_act_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_act_timeout cannot be 0".into(),
            ));
        }

        if self.max_pending == Some(0) {
            return Err(ConfigError::InvalidLimit("max_pending cannot be 0".into()));
        }

        Ok(())
    }
}

/// Per-call options for `act`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActOptions {
    /// Overrides [`EndpointConfig::default_act_timeout`] for this call.
    pub timeout: Option<Duration>,
}

impl ActOptions {
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Plain numbers are milliseconds
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid duration format")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EndpointConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_act_timeout, Duration::from_secs(30));
        assert_eq!(config.max_pending, None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EndpointConfig::with_default_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimeout(_))
        ));
    }

    #[test]
    fn test_zero_max_pending_rejected() {
        let config = EndpointConfig {
            max_pending: Some(0),
            ..EndpointConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EndpointConfig =
            serde_json::from_str(r#"{"default_act_timeout": "500ms"}"#).unwrap();
        assert_eq!(config.default_act_timeout, Duration::from_millis(500));
        assert_eq!(config.max_pending, None);

        let config: EndpointConfig = serde_json::from_str(r#"{"max_pending": 8}"#).unwrap();
        assert_eq!(config.default_act_timeout, DEFAULT_ACT_TIMEOUT);
        assert_eq!(config.max_pending, Some(8));
    }

    #[test]
    fn test_serialize_timeout() {
        let json = serde_json::to_value(EndpointConfig::default()).unwrap();
        assert_eq!(json["default_act_timeout"], "30s");

        let json =
            serde_json::to_value(EndpointConfig::with_default_timeout(Duration::from_millis(1500)))
                .unwrap();
        assert_eq!(json["default_act_timeout"], "1500ms");
    }

    #[test]
    fn test_parse_duration_units() {
        use super::humantime_serde::parse_duration;
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("250"), Ok(Duration::from_millis(250)));
        assert!(parse_duration("soon").is_err());
    }
}
