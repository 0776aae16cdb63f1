//! Configuration fingerprints.
//!
//! The fingerprint is a SHA-256 digest over a canonical encoding of the
//! configuration content. Subjects are sorted and properties are taken in
//! key order, so two configurations built in a different order but with the
//! same content map to the same fingerprint. Every field is length-prefixed
//! and optional fields carry a presence tag, which keeps
//! `("ab", "c")` and `("a", "bc")` apart.

use crate::config::{ConnectorConfig, Credentials};
use sha2::{Digest, Sha256};
use std::fmt;

const ENCODING_VERSION: &[u8] = b"natspool-fingerprint-v1";

/// Deterministic identity of a [`ConnectorConfig`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// Compute the fingerprint of a configuration.
///
/// This is a pure function of the content; [`ConnectorConfig::fingerprint`]
/// returns the value computed once at build time.
pub fn fingerprint(config: &ConnectorConfig) -> Fingerprint {
    let mut enc = Encoder::default();
    enc.bytes(ENCODING_VERSION);

    enc.str(&config.url);

    let mut subjects: Vec<&str> = config.subjects.iter().map(String::as_str).collect();
    subjects.sort_unstable();
    enc.len(subjects.len());
    for subject in subjects {
        enc.str(subject);
    }

    match config.idle_timeout {
        Some(timeout) => {
            enc.tag(1);
            enc.bytes(&timeout.as_nanos().to_be_bytes());
        }
        None => enc.tag(0),
    }

    enc.opt_str(config.durable_group.as_deref());

    match &config.credentials {
        None => enc.tag(0),
        Some(Credentials::UserPassword { username, password }) => {
            enc.tag(1);
            enc.str(username);
            enc.str(password.expose());
        }
        Some(Credentials::Token(token)) => {
            enc.tag(2);
            enc.str(token.expose());
        }
    }

    enc.str(&config.connection_name);

    enc.len(config.properties.len());
    for (key, value) in &config.properties {
        enc.str(key);
        enc.str(value);
    }

    Fingerprint(enc.finish())
}

#[derive(Default)]
struct Encoder {
    hasher: Sha256,
}

impl Encoder {
    fn tag(&mut self, tag: u8) {
        self.hasher.update([tag]);
    }

    fn len(&mut self, len: usize) {
        self.hasher.update((len as u64).to_be_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.len(bytes.len());
        self.hasher.update(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn opt_str(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.tag(1);
                self.str(s);
            }
            None => self.tag(0),
        }
    }

    fn finish(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base() -> crate::ConnectorConfigBuilder {
        ConnectorConfig::builder("nats://localhost:4222").subjects(["orders", "audit"])
    }

    #[test]
    fn same_content_same_fingerprint() {
        let a = base().build().unwrap();
        let b = base().build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(fingerprint(&a), a.fingerprint());
    }

    #[test]
    fn subject_order_is_ignored() {
        let a = base().build().unwrap();
        let b = ConnectorConfig::builder("nats://localhost:4222")
            .subjects(["audit", "orders"])
            .build()
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn property_insertion_order_is_ignored() {
        let a = base()
            .property("x", "1")
            .property("y", "2")
            .build()
            .unwrap();
        let b = base()
            .property("y", "2")
            .property("x", "1")
            .build()
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn each_field_changes_the_fingerprint() {
        let reference = base().build().unwrap().fingerprint();
        let variants = [
            ConnectorConfig::builder("nats://localhost:4223")
                .subjects(["orders", "audit"])
                .build(),
            base().subject("extra").build(),
            base().idle_timeout(Duration::from_secs(1)).build(),
            base().durable_group("g").build(),
            base().token("t").build(),
            base().user_and_password("u", "p").build(),
            base().connection_name("other").build(),
            base().property("k", "v").build(),
        ];
        for variant in variants {
            assert_ne!(variant.unwrap().fingerprint(), reference);
        }
    }

    #[test]
    fn idle_timeouts_are_distinguished() {
        let a = base().idle_timeout(Duration::from_secs(1)).build().unwrap();
        let b = base().idle_timeout(Duration::from_secs(2)).build().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn length_prefix_keeps_boundaries() {
        let a = base().property("ab", "c").build().unwrap();
        let b = base().property("a", "bc").build().unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn display_is_full_hex() {
        let fp = base().build().unwrap().fingerprint();
        let hex = fp.to_string();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with(&fp.short()));
        assert!(format!("{fp:?}").starts_with("Fingerprint("));
    }
}
