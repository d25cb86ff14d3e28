use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;

use crate::errors::{SnowflakeError, SnowflakeResult};

const DEFAULT_MAX_OPEN_CONNECTIONS: usize = 4;

// Percent-escape everything outside the RFC 3986 unreserved set
const CREDENTIAL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Connection configuration, decoded from the host's untyped map.
///
/// Unknown keys and malformed values are rejected outright rather than
/// silently ignored. Exactly one of `password` / `private_key` is the active
/// authentication secret; key-pair authentication takes precedence when both
/// are present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub connection_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// PEM text, PEM with literal `\n` escapes, or a key file path
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub username_template: Option<String>,
    #[serde(default)]
    pub max_open_connections: usize,
    #[serde(default)]
    pub max_idle_connections: usize,
    /// Duration string ("30m", "90s") or whole seconds; zero means unlimited
    #[serde(default, deserialize_with = "deserialize_lifetime")]
    pub max_connection_lifetime: Option<Duration>,
    #[serde(default)]
    pub disable_escaping: bool,
}

impl ConnectionConfig {
    /// Decode and validate the host-supplied configuration map, apply pool
    /// defaults, and substitute static credentials into the connection URL.
    pub fn decode(raw: &serde_json::Value) -> SnowflakeResult<Self> {
        let mut config: ConnectionConfig = serde_json::from_value(raw.clone())
            .map_err(|err| SnowflakeError::Configuration(err.to_string()))?;

        if config.connection_url.is_empty() {
            return Err(SnowflakeError::Configuration(
                "connection_url cannot be empty".to_owned(),
            ));
        }

        if !config.password.is_empty() {
            let (username, password) = if config.disable_escaping {
                (config.username.clone(), config.password.clone())
            } else {
                (escape(&config.username), escape(&config.password))
            };
            // Replace templated username and password in the connection URL
            // with actual values
            config.connection_url = config
                .connection_url
                .replace("{{username}}", &username)
                .replace("{{password}}", &password);
        }

        if config.max_open_connections == 0 {
            config.max_open_connections = DEFAULT_MAX_OPEN_CONNECTIONS;
        }
        if config.max_idle_connections == 0 {
            config.max_idle_connections = config.max_open_connections;
        }
        if config.max_idle_connections > config.max_open_connections {
            config.max_idle_connections = config.max_open_connections;
        }

        Ok(config)
    }
}

fn escape(value: &str) -> String {
    utf8_percent_encode(value, CREDENTIAL_ESCAPE).to_string()
}

fn deserialize_lifetime<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let duration = match raw {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::Number(n)) => {
            let secs = n.as_u64().ok_or_else(|| {
                D::Error::custom("invalid max_connection_lifetime: expected whole non-negative seconds")
            })?;
            Duration::from_secs(secs)
        }
        Some(serde_json::Value::String(text)) => {
            let text = text.trim();
            if let Ok(secs) = text.parse::<u64>() {
                Duration::from_secs(secs)
            } else {
                humantime::parse_duration(text).map_err(|err| {
                    D::Error::custom(format!("invalid max_connection_lifetime: {err}"))
                })?
            }
        }
        Some(other) => {
            return Err(D::Error::custom(format!(
                "invalid max_connection_lifetime: unexpected {other}"
            )))
        }
    };
    // "0s" and 0 both mean no lifetime bound
    Ok(if duration.is_zero() { None } else { Some(duration) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn applies_pool_defaults() {
        let config = ConnectionConfig::decode(&json!({
            "connection_url": "acct.snowflakecomputing.com/db",
        }))
        .unwrap();
        assert_eq!(config.max_open_connections, 4);
        assert_eq!(config.max_idle_connections, 4);
        assert_eq!(config.max_connection_lifetime, None);
    }

    #[test]
    fn clamps_idle_to_open() {
        let config = ConnectionConfig::decode(&json!({
            "connection_url": "acct.snowflakecomputing.com/db",
            "max_open_connections": 2,
            "max_idle_connections": 10,
        }))
        .unwrap();
        assert_eq!(config.max_idle_connections, 2);
    }

    #[test]
    fn rejects_empty_connection_url() {
        let err = ConnectionConfig::decode(&json!({})).unwrap_err();
        assert!(matches!(err, SnowflakeError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ConnectionConfig::decode(&json!({
            "connection_url": "acct.snowflakecomputing.com/db",
            "max_open_conections": 4,
        }))
        .unwrap_err();
        assert!(matches!(err, SnowflakeError::Configuration(_)));
    }

    #[test]
    fn substitutes_escaped_credentials_into_url() {
        let config = ConnectionConfig::decode(&json!({
            "connection_url": "{{username}}:{{password}}@acct",
            "username": "admin",
            "password": "p@ss/word",
        }))
        .unwrap();
        assert_eq!(config.connection_url, "admin:p%40ss%2Fword@acct");
    }

    #[test]
    fn escaping_can_be_disabled() {
        let config = ConnectionConfig::decode(&json!({
            "connection_url": "{{username}}:{{password}}@acct",
            "username": "admin",
            "password": "p@ss",
            "disable_escaping": true,
        }))
        .unwrap();
        assert_eq!(config.connection_url, "admin:p@ss@acct");
    }

    #[test]
    fn url_untouched_without_password() {
        let config = ConnectionConfig::decode(&json!({
            "connection_url": "{{username}}:{{password}}@acct",
        }))
        .unwrap();
        assert_eq!(config.connection_url, "{{username}}:{{password}}@acct");
    }

    #[test]
    fn parses_lifetime_forms() {
        for (value, expected) in [
            (json!("90s"), Some(Duration::from_secs(90))),
            (json!("2h"), Some(Duration::from_secs(7200))),
            (json!("30"), Some(Duration::from_secs(30))),
            (json!(30), Some(Duration::from_secs(30))),
            (json!("0s"), None),
            (json!(0), None),
        ] {
            let config = ConnectionConfig::decode(&json!({
                "connection_url": "acct.snowflakecomputing.com/db",
                "max_connection_lifetime": value,
            }))
            .unwrap();
            assert_eq!(config.max_connection_lifetime, expected);
        }
    }

    #[test]
    fn rejects_malformed_lifetime() {
        let err = ConnectionConfig::decode(&json!({
            "connection_url": "acct.snowflakecomputing.com/db",
            "max_connection_lifetime": "ninety seconds",
        }))
        .unwrap_err();
        assert!(matches!(err, SnowflakeError::Configuration(_)));
    }
}
