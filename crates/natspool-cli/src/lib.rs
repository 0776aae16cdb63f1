//! natspool CLI library - testable functions and modules
//!
//! This library provides the configuration loading and the publish driver
//! used by the `natspool` binary.

pub mod config;
pub mod publish;

use natspool_core::ConnectorConfig;

/// Describe the resolved connector configuration, one `key: value` per line
pub fn describe_config(config: &ConnectorConfig) -> String {
    let mut lines = vec![
        format!("fingerprint: {}", config.fingerprint()),
        format!("url: {}", config.url()),
        format!("subjects: {}", config.subjects().join(", ")),
        format!(
            "idle_timeout: {}",
            config
                .idle_timeout()
                .map(|d| format!("{:?}", d))
                .unwrap_or_else(|| "none".to_string())
        ),
        format!(
            "delivery: {}",
            match config.durable_group() {
                Some(group) => format!("durable (group {})", group),
                None => "at-most-once".to_string(),
            }
        ),
        format!("connection_name: {}", config.connection_name()),
    ];
    for (key, value) in config.properties() {
        lines.push(format!("property {}: {}", key, value));
    }
    lines.join("\n")
}
