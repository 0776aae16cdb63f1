//! Immutable connector configuration.
//!
//! A [`ConnectorConfig`] is only obtainable through
//! [`ConnectorConfigBuilder::build`], which validates the input, resolves
//! the recognised property keys and computes the [`Fingerprint`] once. The
//! value has no setters, so the fingerprint can never go stale.
//!
//! # Property keys
//!
//! | Key | Effect |
//! |-----|--------|
//! | `nats.url` | Overrides the broker URL given to the builder |
//! | `nats.subjects` | Comma-separated subjects, appended after explicit ones |
//! | `nats.idle_timeout` | Idle eviction window (`250ms`, `2s`, `1m`, bare millis) |
//! | `nats.durable_group` | Durable (JetStream) group identifier |
//! | `nats.username` / `nats.password` | User/password credentials |
//! | `nats.token` | Token credentials |
//! | `nats.connection_name` | Prefix of the connection name shown by the broker |
//!
//! Apart from `nats.url`, a recognised property only applies when the
//! corresponding builder method was not called. Recognised keys are removed
//! from the stored property bag once resolved; every other key is kept as
//! opaque content and takes part in the fingerprint.

use crate::error::ConfigError;
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::security::SecretString;
use crate::subject::validate_subject;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Recognised property-bag keys.
pub mod keys {
    pub const URL: &str = "nats.url";
    pub const SUBJECTS: &str = "nats.subjects";
    pub const IDLE_TIMEOUT: &str = "nats.idle_timeout";
    pub const DURABLE_GROUP: &str = "nats.durable_group";
    pub const USERNAME: &str = "nats.username";
    pub const PASSWORD: &str = "nats.password";
    pub const TOKEN: &str = "nats.token";
    pub const CONNECTION_NAME: &str = "nats.connection_name";
}

/// Connection name prefix used when none is configured.
pub const DEFAULT_CONNECTION_NAME: &str = "natspool";

const ALLOWED_SCHEMES: &[&str] = &["nats", "tls", "ws", "wss"];

/// Broker credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    UserPassword {
        username: String,
        password: SecretString,
    },
    Token(SecretString),
}

/// Validated, immutable connector configuration.
///
/// Equality and hashing are defined by the [`Fingerprint`], i.e. over the
/// canonical content rather than the exact input shape.
#[derive(Clone)]
pub struct ConnectorConfig {
    pub(crate) url: String,
    pub(crate) properties: BTreeMap<String, String>,
    pub(crate) subjects: Vec<String>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) durable_group: Option<String>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) connection_name: String,
    fingerprint: Fingerprint,
}

impl ConnectorConfig {
    pub fn builder(url: impl Into<String>) -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::new(url)
    }

    /// Build a configuration purely from a property bag (`nats.url` and
    /// `nats.subjects` are then required).
    pub fn from_properties<K, V, I>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ConnectorConfigBuilder::new("").properties(properties).build()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opaque properties, without the recognised `nats.*` keys.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Subjects in configuration order, deduplicated.
    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn durable_group(&self) -> Option<&str> {
        self.durable_group.as_deref()
    }

    /// `true` when messages go through the acknowledged (durable) path.
    pub fn is_durable(&self) -> bool {
        self.durable_group.is_some()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }
}

impl PartialEq for ConnectorConfig {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for ConnectorConfig {}

impl Hash for ConnectorConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("url", &self.url)
            .field("subjects", &self.subjects)
            .field("idle_timeout", &self.idle_timeout)
            .field("durable_group", &self.durable_group)
            .field("credentials", &self.credentials)
            .field("connection_name", &self.connection_name)
            .field("properties", &self.properties)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Builder for [`ConnectorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfigBuilder {
    url: String,
    properties: BTreeMap<String, String>,
    subjects: Vec<String>,
    idle_timeout: Option<Duration>,
    durable_group: Option<String>,
    credentials: Option<Credentials>,
    connection_name: Option<String>,
}

impl ConnectorConfigBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subjects.push(subject.into());
        self
    }

    pub fn subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties<K, V, I>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn durable_group(mut self, group: impl Into<String>) -> Self {
        self.durable_group = Some(group.into());
        self
    }

    pub fn user_and_password(
        mut self,
        username: impl Into<String>,
        password: impl Into<SecretString>,
    ) -> Self {
        self.credentials = Some(Credentials::UserPassword {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn token(mut self, token: impl Into<SecretString>) -> Self {
        self.credentials = Some(Credentials::Token(token.into()));
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = Some(name.into());
        self
    }

    /// Validate, resolve properties and freeze the configuration.
    pub fn build(self) -> Result<ConnectorConfig, ConfigError> {
        let mut properties = self.properties;

        let url = match properties.remove(keys::URL) {
            Some(url) => url,
            None => self.url,
        };
        let url = url.trim().to_string();
        validate_url(&url)?;

        let mut subjects: Vec<String> = Vec::new();
        let from_property = properties.remove(keys::SUBJECTS).unwrap_or_default();
        let candidates = self
            .subjects
            .into_iter()
            .map(|s| s.trim().to_string())
            .chain(from_property.split(',').map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty());
        for subject in candidates {
            validate_subject(&subject)?;
            if !subjects.contains(&subject) {
                subjects.push(subject);
            }
        }
        if subjects.is_empty() {
            return Err(ConfigError::NoSubjects);
        }

        let idle_property = properties.remove(keys::IDLE_TIMEOUT);
        let idle_timeout = match (self.idle_timeout, idle_property) {
            (Some(timeout), _) => Some(timeout),
            (None, Some(raw)) => Some(parse_duration(&raw).map_err(|reason| {
                ConfigError::InvalidProperty {
                    key: keys::IDLE_TIMEOUT.to_string(),
                    value: raw.clone(),
                    reason,
                }
            })?),
            (None, None) => None,
        };

        let group_property = properties.remove(keys::DURABLE_GROUP);
        let durable_group = self
            .durable_group
            .or(group_property)
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());

        let username = properties.remove(keys::USERNAME);
        let password = properties.remove(keys::PASSWORD).map(SecretString::from);
        let token = properties.remove(keys::TOKEN).map(SecretString::from);
        let credentials = match self.credentials {
            Some(credentials) => Some(credentials),
            None => Credentials::from_parts(username, password, token)?,
        };

        let name_property = properties.remove(keys::CONNECTION_NAME);
        let connection_name = self
            .connection_name
            .or(name_property)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_CONNECTION_NAME.to_string());

        let mut config = ConnectorConfig {
            url,
            properties,
            subjects,
            idle_timeout,
            durable_group,
            credentials,
            connection_name,
            fingerprint: Fingerprint::default(),
        };
        config.fingerprint = fingerprint(&config);
        Ok(config)
    }
}

impl Credentials {
    /// Combine optional username, password and token into credentials.
    ///
    /// A username needs a password and vice versa; a token excludes both.
    pub fn from_parts(
        username: Option<String>,
        password: Option<SecretString>,
        token: Option<SecretString>,
    ) -> Result<Option<Credentials>, ConfigError> {
        match (username, password, token) {
            (Some(username), Some(password), None) => Ok(Some(Credentials::UserPassword {
                username,
                password,
            })),
            (None, None, Some(token)) => Ok(Some(Credentials::Token(token))),
            (None, None, None) => Ok(None),
            (Some(username), None, _) => Err(ConfigError::InvalidProperty {
                key: keys::USERNAME.to_string(),
                value: username,
                reason: format!("'{}' is required with a username", keys::PASSWORD),
            }),
            (None, Some(_), _) => Err(ConfigError::InvalidProperty {
                key: keys::PASSWORD.to_string(),
                value: "[REDACTED]".to_string(),
                reason: format!("'{}' is required with a password", keys::USERNAME),
            }),
            (Some(_), Some(_), Some(_)) => Err(ConfigError::InvalidProperty {
                key: keys::TOKEN.to_string(),
                value: "[REDACTED]".to_string(),
                reason: "token and user/password credentials are mutually exclusive".to_string(),
            }),
        }
    }
}

/// Check a broker URL, which may be a comma-separated server list.
fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(ConfigError::EmptyUrl);
    }
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    for server in url.split(',').map(str::trim) {
        if server.is_empty() {
            return Err(invalid("empty entry in server list".to_string()));
        }
        if server.chars().any(char::is_whitespace) {
            return Err(invalid(format!("'{server}' contains whitespace")));
        }
        let authority = match server.split_once("://") {
            Some((scheme, rest)) => {
                if !ALLOWED_SCHEMES.contains(&scheme) {
                    return Err(invalid(format!(
                        "unsupported scheme '{scheme}' (expected one of {})",
                        ALLOWED_SCHEMES.join(", ")
                    )));
                }
                rest
            }
            None => server,
        };
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split('/').next().unwrap_or(host);
        if host.is_empty() || host.starts_with(':') {
            return Err(invalid(format!("'{server}' has no host")));
        }
        if let Some((_, port)) = host.rsplit_once(':') {
            if !host.ends_with(']') && port.parse::<u16>().is_err() {
                return Err(invalid(format!("'{port}' is not a valid port")));
            }
        }
    }
    Ok(())
}

/// Parse a duration such as `250ms`, `2s`, `1m`, or a bare number of
/// milliseconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => raw.split_at(pos),
        None => (raw, "ms"),
    };
    if digits.is_empty() {
        return Err("expected a number".to_string());
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("invalid number: {e}"))?;
    match unit.trim() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        other => Err(format!("unknown unit '{other}' (expected ms, s or m)")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_subject_order_and_dedups() {
        let config = ConnectorConfig::builder("nats://localhost:4222")
            .subjects(["b", "a", "b"])
            .build()
            .unwrap();
        assert_eq!(config.subjects(), &["b".to_string(), "a".to_string()]);
        assert_eq!(config.connection_name(), DEFAULT_CONNECTION_NAME);
        assert!(config.idle_timeout().is_none());
        assert!(!config.is_durable());
    }

    #[test]
    fn empty_subjects_are_rejected() {
        let err = ConnectorConfig::builder("nats://localhost:4222")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoSubjects);

        let err = ConnectorConfig::builder("nats://localhost:4222")
            .subject("   ")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::NoSubjects);
    }

    #[test]
    fn url_property_overrides_builder_url() {
        let config = ConnectorConfig::builder("nats://ignored:4222")
            .subject("a")
            .property(keys::URL, "nats://broker:4223")
            .build()
            .unwrap();
        assert_eq!(config.url(), "nats://broker:4223");
        assert!(config.property(keys::URL).is_none());
    }

    #[test]
    fn subjects_property_is_split_and_trimmed() {
        let config = ConnectorConfig::from_properties([
            (keys::URL, "nats://localhost:4222"),
            (keys::SUBJECTS, "sub1, main , sub2,,"),
        ])
        .unwrap();
        assert_eq!(config.subjects(), &["sub1", "main", "sub2"]);
    }

    #[test]
    fn explicit_values_win_over_properties() {
        let config = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .idle_timeout(Duration::from_secs(5))
            .durable_group("explicit")
            .property(keys::IDLE_TIMEOUT, "1s")
            .property(keys::DURABLE_GROUP, "from-props")
            .build()
            .unwrap();
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.durable_group(), Some("explicit"));
    }

    #[test]
    fn properties_fill_unset_fields() {
        let config = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .property(keys::IDLE_TIMEOUT, "750ms")
            .property(keys::DURABLE_GROUP, "cluster-1")
            .property(keys::CONNECTION_NAME, "ingest")
            .property("custom.flag", "on")
            .build()
            .unwrap();
        assert_eq!(config.idle_timeout(), Some(Duration::from_millis(750)));
        assert_eq!(config.durable_group(), Some("cluster-1"));
        assert_eq!(config.connection_name(), "ingest");
        assert_eq!(config.property("custom.flag"), Some("on"));
        assert_eq!(config.properties().len(), 1);
    }

    #[test]
    fn invalid_idle_timeout_property_is_reported() {
        let err = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .property(keys::IDLE_TIMEOUT, "soon")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProperty { ref key, .. } if key == keys::IDLE_TIMEOUT));
    }

    #[test]
    fn credentials_from_properties() {
        let config = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .property(keys::USERNAME, "alice")
            .property(keys::PASSWORD, "pw")
            .build()
            .unwrap();
        match config.credentials() {
            Some(Credentials::UserPassword { username, password }) => {
                assert_eq!(username, "alice");
                assert_eq!(password.expose(), "pw");
            }
            other => panic!("unexpected credentials: {:?}", other),
        }
        assert!(config.property(keys::PASSWORD).is_none());
        assert!(!format!("{:?}", config).contains("pw\""));
    }

    #[test]
    fn wildcard_subject_is_rejected_at_build() {
        let err = ConnectorConfig::builder("nats://localhost:4222")
            .subjects(["orders", "audit.>"])
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubject { ref subject, .. } if subject == "audit.>"));
    }

    #[test]
    fn credentials_from_parts() {
        let token = Credentials::from_parts(None, None, Some("t".into())).unwrap();
        assert!(matches!(token, Some(Credentials::Token(_))));
        assert_eq!(Credentials::from_parts(None, None, None).unwrap(), None);
        assert!(Credentials::from_parts(Some("alice".into()), None, None).is_err());
        assert!(Credentials::from_parts(None, Some("pw".into()), Some("t".into())).is_err());
        assert!(
            Credentials::from_parts(Some("alice".into()), Some("pw".into()), Some("t".into()))
                .is_err()
        );
    }

    #[test]
    fn username_without_password_is_rejected() {
        let err = ConnectorConfig::builder("nats://localhost:4222")
            .subject("a")
            .property(keys::USERNAME, "alice")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProperty { .. }));
    }

    #[test]
    fn url_validation() {
        assert_eq!(
            ConnectorConfig::builder("  ").subject("a").build().unwrap_err(),
            ConfigError::EmptyUrl
        );
        for bad in ["http://localhost:4222", "nats://:4222", "nats://host:port", "a b"] {
            let err = ConnectorConfig::builder(bad).subject("a").build().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidUrl { .. }),
                "{bad} should be rejected, got {err:?}"
            );
        }
        for good in [
            "nats://localhost:4222",
            "localhost:4222",
            "tls://user:pw@broker.example.com:4443",
            "nats://a:4222,nats://b:4222",
        ] {
            assert!(
                ConnectorConfig::builder(good).subject("a").build().is_ok(),
                "{good} should be accepted"
            );
        }
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("2s"), Ok(Duration::from_secs(2)));
        assert_eq!(parse_duration("1m"), Ok(Duration::from_secs(60)));
        assert_eq!(parse_duration("1500"), Ok(Duration::from_millis(1500)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("2h").is_err());
        assert!(parse_duration("ms").is_err());
    }
}
