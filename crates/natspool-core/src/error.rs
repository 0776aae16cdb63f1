//! Configuration error type

/// Errors raised while building a [`ConnectorConfig`](crate::ConnectorConfig).
///
/// These are always reported synchronously, before any pool interaction,
/// and are never worth retrying without changing the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No subject was supplied, neither explicitly nor through properties.
    #[error("a connector needs at least one subject")]
    NoSubjects,

    /// The broker URL is empty or blank.
    #[error("broker URL is empty")]
    EmptyUrl,

    /// The broker URL could not be understood.
    #[error("invalid broker URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A subject name breaks the subject rules.
    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject { subject: String, reason: String },

    /// A recognised property carries a value that cannot be parsed.
    #[error("invalid value '{value}' for property '{key}': {reason}")]
    InvalidProperty {
        key: String,
        value: String,
        reason: String,
    },
}
