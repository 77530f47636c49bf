//! Configuration snapshot and the locked-store interface the rest of the
//! crate consumes it through.
//!
//! The real configuration collaborator lives outside this core (it owns
//! parsing, validation, and the on-disk format). What this core needs is
//! exactly what's re-specified here: a typed snapshot and a way to read the
//! current one under a lock, with a reload entry point for SIGHUP.

use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::CoreError;

/// One `listeners[]` entry.
#[derive(Clone, Debug, Deserialize)]
pub struct ListenerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub send_buffer: Option<u32>,
    #[serde(default)]
    pub mss: Option<u32>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub shoutcast_compat: bool,
    #[serde(default)]
    pub shoutcast_mount: Option<String>,
}

fn default_backlog() -> u32 {
    128
}

/// One `aliases[]` entry: `(source-uri, destination-uri, optional port, optional bind-address)`.
#[derive(Clone, Debug, Deserialize)]
pub struct AliasEntry {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub bind_address: Option<IpAddr>,
}

/// TLS material, keyed by listener via shared cert/key/cipher-list config.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct TlsConfig {
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub cipher_list: Option<String>,
}

/// Full configuration snapshot, deserialized from the on-disk YAML file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub tls: TlsConfig,
    pub ban_file: Option<PathBuf>,
    pub allow_file: Option<PathBuf>,
    pub agent_file: Option<PathBuf>,
    #[serde(default = "default_header_timeout_ms")]
    pub header_timeout_ms: u64,
    #[serde(default)]
    pub client_limit: Option<usize>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub relay_user: Option<String>,
    pub relay_password: Option<String>,
    pub source_password: Option<String>,
    #[serde(default)]
    pub ice_login: bool,
    #[serde(default)]
    pub xforward: Vec<IpAddr>,
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
    #[serde(default)]
    pub access_log_exclude_ext: Vec<String>,
    #[serde(default)]
    pub new_connections_slowdown: Option<u32>,
}

fn default_header_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// Parse a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| CoreError::ConfigFailure(format!("reading {}: {e}", path.as_ref().display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| CoreError::ConfigFailure(format!("parsing {}: {e}", path.as_ref().display())))
    }

    /// Look up the alias whose source matches `uri`, if any (first match wins).
    #[must_use]
    pub fn find_alias(&self, uri: &str) -> Option<&AliasEntry> {
        self.aliases.iter().find(|a| a.source == uri)
    }

    /// Whether `peer` is a configured trusted X-Forwarded-For source.
    #[must_use]
    pub fn is_trusted_forwarder(&self, peer: &IpAddr) -> bool {
        self.xforward.iter().any(|ip| ip == peer)
    }
}

/// Locked snapshot store: readers take a cheap `Arc` clone, writers (reload)
/// swap the whole snapshot under a short-lived write lock.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<Config>>>,
    path: Arc<PathBuf>,
}

impl ConfigStore {
    /// Load the file at `path` and wrap it in a store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
            path: Arc::new(path),
        })
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    /// Reread the backing file and install it as the current snapshot.
    /// Matches the SIGHUP "reload" control-channel event.
    pub fn reload(&self) -> Result<(), CoreError> {
        let fresh = Config::load(self.path.as_ref())?;
        *self.inner.write() = Arc::new(fresh);
        tracing::info!(path = %self.path.display(), "configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
listeners:
  - bind_address: "0.0.0.0"
    port: 8000
header_timeout_ms: 5000
client_limit: 100
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.listeners.len(), 1);
        assert_eq!(cfg.listeners[0].port, 8000);
        assert_eq!(cfg.header_timeout_ms, 5000);
        assert_eq!(cfg.client_limit, Some(100));
    }

    #[test]
    fn find_alias_first_match() {
        let yaml = r#"
listeners: []
aliases:
  - source: "/a"
    destination: "/b"
  - source: "/a"
    destination: "/c"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.find_alias("/a").unwrap().destination, "/b");
        assert!(cfg.find_alias("/z").is_none());
    }

    #[test]
    fn trusted_forwarder_exact_match_only() {
        let mut cfg: Config = serde_yaml::from_str("listeners: []\n").unwrap();
        cfg.xforward = vec!["10.0.0.1".parse().unwrap()];
        assert!(cfg.is_trusted_forwarder(&"10.0.0.1".parse().unwrap()));
        assert!(!cfg.is_trusted_forwarder(&"10.0.0.2".parse().unwrap()));
    }
}
