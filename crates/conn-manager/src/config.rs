//! Manager configuration: TOML file plus `TUNNEL_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::requests::ClientIdentity;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteListConfig {
    /// Empty disables remote list refresh.
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Ed25519 public key (hex) the list must be signed with.
    pub public_key_hex: String,
    pub success_cooldown_secs: u64,
    pub failure_cooldown_secs: u64,
}

impl Default for RemoteListConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            path: "/server_list".into(),
            public_key_hex: String::new(),
            success_cooldown_secs: 6 * 60 * 60,
            failure_cooldown_secs: 5 * 60,
        }
    }
}

impl RemoteListConfig {
    pub fn enabled(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn success_cooldown(&self) -> Duration {
        Duration::from_secs(self.success_cooldown_secs)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub identity: ClientIdentity,
    /// Embedded fallback list, newline-delimited hex entries.
    pub embedded_server_list: String,
    /// Read the embedded list from this file instead.
    pub embedded_server_list_file: Option<PathBuf>,
    pub remote_list: RemoteListConfig,
    pub retry_backoff_min_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub request_timeout_secs: u64,
    /// Route file name, resolved under the OS temp directory.
    pub split_tunnel_file: String,
    pub ignore_system_server_list: bool,
    /// Opened when the handshake supplies no homepages.
    pub default_home_page: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            identity: ClientIdentity::default(),
            embedded_server_list: String::new(),
            embedded_server_list_file: None,
            remote_list: RemoteListConfig::default(),
            retry_backoff_min_ms: 1000,
            retry_backoff_max_ms: 2000,
            request_timeout_secs: 20,
            split_tunnel_file: "tunnel_split_routes.txt".into(),
            ignore_system_server_list: false,
            default_home_page: String::new(),
        }
    }
}

impl ManagerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `path` (defaults if absent) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => match fs::read_to_string(p) {
                Ok(s) => Self::from_toml_str(&s)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => Self::default(),
                Err(e) => return Err(Error::Config(format!("{}: {e}", p.display()))),
            },
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    /// Env overrides: TUNNEL_PROPAGATION_CHANNEL_ID, TUNNEL_SPONSOR_ID,
    /// TUNNEL_CLIENT_VERSION, TUNNEL_SERVER_LIST_FILE, TUNNEL_REMOTE_LIST_HOST,
    /// TUNNEL_REMOTE_LIST_PORT, TUNNEL_REMOTE_LIST_PATH, TUNNEL_REMOTE_LIST_PUBKEY,
    /// TUNNEL_REQUEST_TIMEOUT_SECS, TUNNEL_IGNORE_SYSTEM_SERVER_LIST
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = get("TUNNEL_PROPAGATION_CHANNEL_ID") { self.identity.propagation_channel_id = v; }
        if let Some(v) = get("TUNNEL_SPONSOR_ID") { self.identity.sponsor_id = v; }
        if let Some(v) = get("TUNNEL_CLIENT_VERSION") { self.identity.client_version = v; }
        if let Some(v) = get("TUNNEL_SERVER_LIST_FILE") { self.embedded_server_list_file = Some(v.into()); }
        if let Some(v) = get("TUNNEL_REMOTE_LIST_HOST") { self.remote_list.host = v; }
        if let Some(v) = get("TUNNEL_REMOTE_LIST_PORT") {
            self.remote_list.port = v.parse().map_err(|_| Error::Config(format!("TUNNEL_REMOTE_LIST_PORT: {v:?}")))?;
        }
        if let Some(v) = get("TUNNEL_REMOTE_LIST_PATH") { self.remote_list.path = v; }
        if let Some(v) = get("TUNNEL_REMOTE_LIST_PUBKEY") { self.remote_list.public_key_hex = v; }
        if let Some(v) = get("TUNNEL_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = v.parse().map_err(|_| Error::Config(format!("TUNNEL_REQUEST_TIMEOUT_SECS: {v:?}")))?;
        }
        if let Some(v) = get("TUNNEL_IGNORE_SYSTEM_SERVER_LIST") {
            self.ignore_system_server_list = v == "1" || v.eq_ignore_ascii_case("true");
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_backoff_min_ms > self.retry_backoff_max_ms {
            return Err(Error::Config("retry_backoff_min_ms exceeds retry_backoff_max_ms".into()));
        }
        if self.remote_list.enabled() && self.remote_list.public_key_hex.is_empty() {
            return Err(Error::Config("remote list host set without a public key".into()));
        }
        Ok(())
    }

    /// Embedded list text, reading the side file if one is configured.
    pub fn embedded_list(&self) -> Result<String> {
        match &self.embedded_server_list_file {
            Some(p) => fs::read_to_string(p).map_err(|e| Error::Config(format!("{}: {e}", p.display()))),
            None => Ok(self.embedded_server_list.clone()),
        }
    }

    pub fn retry_backoff(&self) -> RangeInclusive<u64> {
        self.retry_backoff_min_ms..=self.retry_backoff_max_ms
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn split_tunnel_path(&self) -> PathBuf {
        std::env::temp_dir().join(&self.split_tunnel_file)
    }
}
