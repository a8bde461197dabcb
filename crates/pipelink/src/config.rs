//! Backend configuration and the registry of known backend kinds

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Location prefix handled by this backend.
pub const SCHEME: &str = "rclone";

/// Configuration needed to start the helper
///
/// `command` overrides the whole helper invocation; when empty the default
/// `rclone serve restic --stdin <remote>` is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command line for starting the helper
    pub command: String,

    /// Remote the helper should serve, e.g. `b2:bucket/repo`
    pub remote: String,

    /// Maximum number of concurrent requests to the helper
    pub connections: usize,

    /// Bound on the startup handshake
    pub handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: String::new(),
            remote: String::new(),
            connections: 20,
            handshake_timeout: pipelink_transport::HANDSHAKE_TIMEOUT,
        }
    }
}

impl Config {
    /// Create a config for `remote` with defaults
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            ..Self::default()
        }
    }

    /// Parse a location of the form `rclone:<remote>`
    pub fn parse(location: &str) -> Result<Self> {
        location
            .strip_prefix(SCHEME)
            .and_then(|rest| rest.strip_prefix(':'))
            .map(Self::new)
            .ok_or_else(|| Error::Config("invalid rclone backend specification".to_string()))
    }

    /// Override the helper command line
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Set the maximum concurrent requests
    ///
    /// Values below one are raised to one.
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Parser turning a location string into a backend config
pub type ParseFn = fn(&str) -> Result<Config>;

/// Registry of backend kinds, keyed by location prefix
///
/// Populated explicitly by whoever selects backends; nothing registers
/// itself implicitly.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    kinds: BTreeMap<String, ParseFn>,
}

impl ConfigRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every backend kind this crate knows
    pub fn with_defaults() -> Self {
        let kinds = [(SCHEME, Config::parse as ParseFn)];
        Self {
            kinds: kinds
                .into_iter()
                .map(|(kind, parse)| (kind.to_string(), parse))
                .collect(),
        }
    }

    /// Register a backend kind; registering a kind twice is an error
    pub fn register(&mut self, kind: impl Into<String>, parse: ParseFn) -> Result<()> {
        let kind = kind.into();
        if self.kinds.contains_key(&kind) {
            return Err(Error::Config(format!("backend kind {kind:?} already registered")));
        }
        self.kinds.insert(kind, parse);
        Ok(())
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Parse `location` with the parser registered for its prefix
    pub fn parse(&self, location: &str) -> Result<(String, Config)> {
        let (kind, _) = location
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("location {location:?} has no backend prefix")))?;
        let parse = self
            .kinds
            .get(kind)
            .ok_or_else(|| Error::Config(format!("unknown backend kind {kind:?}")))?;
        Ok((kind.to_string(), parse(location)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.command, "");
        assert_eq!(config.remote, "");
        assert_eq!(config.connections, 20);
        assert_eq!(config.handshake_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("local:/srv/repo")
            .with_command("rclone -vv serve restic --stdin local:/srv/repo")
            .with_connections(0)
            .with_handshake_timeout(Duration::from_secs(5));

        assert_eq!(config.remote, "local:/srv/repo");
        assert!(config.command.starts_with("rclone -vv"));
        assert_eq!(config.connections, 1); // Minimum is 1
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_location() {
        let config = Config::parse("rclone:b2:bucket/repo").unwrap();
        assert_eq!(config.remote, "b2:bucket/repo");
        assert_eq!(config.command, "");

        assert!(Config::parse("sftp:host:/repo").is_err());
        assert!(Config::parse("rclonefoo").is_err());
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"remote": "local:/tmp/x"}"#).unwrap();
        assert_eq!(config, Config::new("local:/tmp/x"));
    }

    #[test]
    fn test_registry_dispatches_on_prefix() {
        let registry = ConfigRegistry::with_defaults();
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["rclone"]);

        let (kind, config) = registry.parse("rclone:local:/tmp/x").unwrap();
        assert_eq!(kind, "rclone");
        assert_eq!(config.remote, "local:/tmp/x");

        assert!(registry.parse("s3:bucket").is_err());
        assert!(registry.parse("no-prefix").is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ConfigRegistry::new();
        registry.register("rclone", Config::parse).unwrap();
        assert!(registry.register("rclone", Config::parse).is_err());
    }
}
