//! Subject validation and composition.

use crate::error::ConfigError;

/// Separator between subject tokens.
pub const SUBJECT_SEPARATOR: char = '.';

/// Check a subject name against the broker's token rules.
///
/// A subject must be non-empty and contain no whitespace. It must not
/// start or end with the separator or contain an empty token. Wildcard
/// tokens (`*`, `>`) are rejected because these subjects are published to.
pub fn validate_subject(subject: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSubject {
        subject: subject.to_string(),
        reason: reason.to_string(),
    };

    if subject.is_empty() {
        return Err(invalid("subject is empty"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(invalid("subject contains whitespace"));
    }
    if subject.split(SUBJECT_SEPARATOR).any(str::is_empty) {
        return Err(invalid("subject contains an empty token"));
    }
    if subject
        .split(SUBJECT_SEPARATOR)
        .any(|token| token == "*" || token == ">")
    {
        return Err(invalid("wildcards cannot be published to"));
    }
    Ok(())
}

/// Join a configured subject with a per-message suffix.
///
/// An empty suffix leaves the subject unchanged. Separators at the seam are
/// collapsed so `"orders."` + `".eu"` gives `"orders.eu"`.
pub fn compose_subject(subject: &str, suffix: &str) -> String {
    let head = subject.trim_end_matches(SUBJECT_SEPARATOR);
    let tail = suffix.trim_start_matches(SUBJECT_SEPARATOR);
    if tail.is_empty() {
        return head.to_string();
    }
    if head.is_empty() {
        return tail.to_string();
    }
    format!("{head}{SUBJECT_SEPARATOR}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_subjects_pass() {
        assert!(validate_subject("orders").is_ok());
        assert!(validate_subject("orders.eu.created").is_ok());
        assert!(validate_subject("metrics.a*b").is_ok());
    }

    #[test]
    fn wildcard_tokens_are_rejected() {
        for subject in ["*", ">", "metrics.*", "metrics.>", "orders.*.eu"] {
            assert!(
                matches!(validate_subject(subject), Err(ConfigError::InvalidSubject { .. })),
                "{subject} should be rejected"
            );
        }
    }

    #[test]
    fn malformed_subjects_are_rejected() {
        assert!(matches!(
            validate_subject(""),
            Err(ConfigError::InvalidSubject { .. })
        ));
        assert!(validate_subject("has space").is_err());
        assert!(validate_subject("tab\there").is_err());
        assert!(validate_subject(".leading").is_err());
        assert!(validate_subject("trailing.").is_err());
        assert!(validate_subject("double..dot").is_err());
    }

    #[test]
    fn compose_joins_with_single_separator() {
        assert_eq!(compose_subject("orders", "eu"), "orders.eu");
        assert_eq!(compose_subject("orders.", "eu"), "orders.eu");
        assert_eq!(compose_subject("orders", ".eu"), "orders.eu");
        assert_eq!(compose_subject("orders.", ".eu"), "orders.eu");
    }

    #[test]
    fn compose_with_empty_suffix_keeps_subject() {
        assert_eq!(compose_subject("orders", ""), "orders");
        assert_eq!(compose_subject("orders", "."), "orders");
    }
}
