//! Configuration file support for natspool
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # natspool configuration file
//!
//! connector:
//!   url: "nats://localhost:4222"
//!   subjects:
//!     - orders
//!     - audit
//!   idle_timeout: 30s
//!   connection_name: ingest
//!   properties:
//!     app.region: eu-west-1
//!
//! logging:
//!   level: info
//! ```

use natspool_core::{parse_duration, ConnectorConfig, Credentials, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings
    pub connector: ConnectorSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSection {
    /// Broker URL (comma-separated for several servers)
    pub url: String,

    /// Subjects every message is published on
    pub subjects: Vec<String>,

    /// Idle eviction window (`250ms`, `2s`, `1m`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<String>,

    /// Durable group; enables acknowledged JetStream publishing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub durable_group: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretString>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<SecretString>,

    /// Prefix of the connection name shown by the broker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,

    /// Extra properties (`nats.*` keys are interpreted, others kept as-is)
    pub properties: BTreeMap<String, String>,
}

impl Default for ConnectorSection {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subjects: Vec::new(),
            idle_timeout: None,
            durable_group: None,
            username: None,
            password: None,
            token: None,
            connection_name: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Values given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConnectorOverrides {
    pub url: Option<String>,
    pub subjects: Vec<String>,
    pub idle_timeout: Option<String>,
    pub durable_group: Option<String>,
    pub connection_name: Option<String>,
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FileConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FileConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => {
                // Try YAML first, then TOML
                Self::from_yaml(&content).or_else(|_| Self::from_toml(&content))
            }
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, FileConfigError> {
        serde_yaml::from_str(content).map_err(|e| FileConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, FileConfigError> {
        toml::from_str(content).map_err(|e| FileConfigError::ParseError(e.to_string()))
    }

    /// Apply command-line values over the file values
    pub fn merge(&mut self, overrides: ConnectorOverrides) {
        if let Some(url) = overrides.url {
            self.connector.url = url;
        }
        if !overrides.subjects.is_empty() {
            self.connector.subjects = overrides.subjects;
        }
        if overrides.idle_timeout.is_some() {
            self.connector.idle_timeout = overrides.idle_timeout;
        }
        if overrides.durable_group.is_some() {
            self.connector.durable_group = overrides.durable_group;
        }
        if overrides.connection_name.is_some() {
            self.connector.connection_name = overrides.connection_name;
        }
    }

    /// Build the validated connector configuration
    pub fn connector_config(&self) -> Result<ConnectorConfig, natspool_core::ConfigError> {
        let section = &self.connector;
        let mut builder = ConnectorConfig::builder(section.url.clone())
            .subjects(section.subjects.iter().cloned())
            .properties(section.properties.clone());

        if let Some(raw) = &section.idle_timeout {
            let timeout =
                parse_duration(raw).map_err(|reason| natspool_core::ConfigError::InvalidProperty {
                    key: "connector.idle_timeout".to_string(),
                    value: raw.clone(),
                    reason,
                })?;
            builder = builder.idle_timeout(timeout);
        }
        if let Some(group) = &section.durable_group {
            builder = builder.durable_group(group.clone());
        }
        if let Some(name) = &section.connection_name {
            builder = builder.connection_name(name.clone());
        }
        if let Some(credentials) = Credentials::from_parts(
            section.username.clone(),
            section.password.clone(),
            section.token.clone(),
        )? {
            builder = builder.credentials(credentials);
        }

        builder.build()
    }

    /// Create an example configuration
    pub fn example() -> Self {
        let mut properties = BTreeMap::new();
        properties.insert("app.region".to_string(), "eu-west-1".to_string());

        Self {
            connector: ConnectorSection {
                url: "nats://localhost:4222".to_string(),
                subjects: vec!["orders".to_string(), "audit".to_string()],
                idle_timeout: Some("30s".to_string()),
                durable_group: None,
                username: None,
                password: None,
                token: None,
                connection_name: Some("ingest".to_string()),
                properties,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration file error types
#[derive(Debug, thiserror::Error)]
pub enum FileConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connector.url, "nats://localhost:4222");
        assert!(config.connector.subjects.is_empty());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connector:
  url: "nats://broker:4222"
  subjects: [orders, audit]
  idle_timeout: 2s
  username: alice
  password: secret
logging:
  level: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connector.url, "nats://broker:4222");
        assert_eq!(config.connector.subjects, vec!["orders", "audit"]);
        assert_eq!(config.logging.level, "debug");

        let connector = config.connector_config().unwrap();
        assert_eq!(connector.idle_timeout(), Some(Duration::from_secs(2)));
        assert!(connector.credentials().is_some());
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[connector]
url = "nats://broker:4222"
subjects = ["orders"]
durable_group = "cluster-a"

[connector.properties]
"app.region" = "eu"
"#;
        let config = Config::from_toml(toml).unwrap();
        let connector = config.connector_config().unwrap();
        assert_eq!(connector.durable_group(), Some("cluster-a"));
        assert_eq!(connector.property("app.region"), Some("eu"));
    }

    #[test]
    fn test_config_merge() {
        let mut config = Config::example();
        config.merge(ConnectorOverrides {
            url: Some("nats://other:4222".to_string()),
            subjects: vec!["metrics".to_string()],
            idle_timeout: Some("500ms".to_string()),
            ..Default::default()
        });
        assert_eq!(config.connector.url, "nats://other:4222");
        assert_eq!(config.connector.subjects, vec!["metrics"]);
        assert_eq!(config.connector.connection_name.as_deref(), Some("ingest"));

        let connector = config.connector_config().unwrap();
        assert_eq!(connector.idle_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_missing_subjects_rejected() {
        let config = Config::default();
        assert_eq!(
            config.connector_config().unwrap_err(),
            natspool_core::ConfigError::NoSubjects
        );
    }

    #[test]
    fn test_bad_idle_timeout_rejected() {
        let mut config = Config::example();
        config.connector.idle_timeout = Some("later".to_string());
        assert!(matches!(
            config.connector_config().unwrap_err(),
            natspool_core::ConfigError::InvalidProperty { .. }
        ));
    }

    #[test]
    fn test_username_without_password_rejected() {
        let yaml = "connector:\n  subjects: [orders]\n  username: alice\n";
        let err = Config::from_yaml(yaml).unwrap().connector_config().unwrap_err();
        assert!(matches!(
            err,
            natspool_core::ConfigError::InvalidProperty { ref value, .. } if value == "alice"
        ));
    }

    #[test]
    fn test_token_with_user_password_rejected() {
        let yaml = r#"
connector:
  subjects: [orders]
  username: alice
  password: secret
  token: t0ken
"#;
        let err = Config::from_yaml(yaml).unwrap().connector_config().unwrap_err();
        assert!(matches!(
            err,
            natspool_core::ConfigError::InvalidProperty { .. }
        ));
        assert!(!err.to_string().contains("t0ken"));
    }

    #[test]
    fn test_example_roundtrips() {
        let yaml = Config::example_yaml();
        let from_yaml = Config::from_yaml(&yaml).unwrap();
        assert_eq!(from_yaml.connector.subjects, vec!["orders", "audit"]);

        let toml = Config::example_toml();
        let from_toml = Config::from_toml(&toml).unwrap();
        assert_eq!(
            from_toml.connector_config().unwrap().fingerprint(),
            from_yaml.connector_config().unwrap().fingerprint()
        );
    }
}
