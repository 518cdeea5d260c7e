//! Connection-scoped session state.

use rand::RngCore;
use regex::Regex;
use serde::Deserialize;
use server_list::ServerEntry;
use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct RegexReplace {
    pub regex: Regex,
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpeedTestTarget {
    pub server_address: String,
    pub server_port: u16,
    pub request_path: String,
}

impl SpeedTestTarget {
    pub fn url(&self) -> String {
        format!("https://{}:{}{}", self.server_address, self.server_port, self.request_path)
    }
}

#[derive(Deserialize)]
struct RegexSpec {
    regex: String,
    replace: String,
}

#[derive(Deserialize, Default)]
struct HandshakeConfig {
    #[serde(default)]
    page_view_regexes: Vec<RegexSpec>,
    #[serde(default)]
    https_request_regexes: Vec<RegexSpec>,
    #[serde(default)]
    speed_test_url: Option<SpeedTestTarget>,
}

/// Server entry plus everything the handshake told us about this session.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    server_entry: ServerEntry,
    client_session_id: String,
    upgrade_version: String,
    psk: String,
    ssh_port: String,
    ssh_username: String,
    ssh_password: String,
    ssh_host_key: String,
    ssh_session_id: String,
    ssh_obfuscated_port: String,
    ssh_obfuscated_key: String,
    homepages: Vec<String>,
    discovered_servers: Vec<String>,
    page_view_regexes: Vec<RegexReplace>,
    https_request_regexes: Vec<RegexReplace>,
    speed_test: Option<SpeedTestTarget>,
}

fn port_string(port: u16) -> String {
    if port == 0 { String::new() } else { port.to_string() }
}

impl SessionInfo {
    /// Fresh session for `entry` with a new client session id. SSH
    /// credentials are seeded from the entry's extended fields.
    pub fn new(entry: ServerEntry) -> Self {
        let mut s = Self::default();
        s.set(entry);
        s.generate_client_session_id();
        s
    }

    pub fn set(&mut self, entry: ServerEntry) {
        *self = Self {
            ssh_port: port_string(entry.ssh_port),
            ssh_username: entry.ssh_username.clone(),
            ssh_password: entry.ssh_password.clone(),
            ssh_host_key: entry.ssh_host_key.clone(),
            ssh_obfuscated_port: port_string(entry.ssh_obfuscated_port),
            ssh_obfuscated_key: entry.ssh_obfuscated_key.clone(),
            server_entry: entry,
            ..Self::default()
        };
    }

    pub fn generate_client_session_id(&mut self) {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.client_session_id = hex::encode_upper(bytes);
    }

    pub fn server_entry(&self) -> &ServerEntry { &self.server_entry }
    pub fn server_address(&self) -> &str { &self.server_entry.address }
    pub fn web_port(&self) -> u16 { self.server_entry.web_port }
    pub fn web_server_secret(&self) -> &str { &self.server_entry.web_secret }
    pub fn web_server_certificate(&self) -> &str { &self.server_entry.web_certificate }
    pub fn client_session_id(&self) -> &str { &self.client_session_id }
    pub fn upgrade_version(&self) -> &str { &self.upgrade_version }
    pub fn psk(&self) -> &str { &self.psk }
    pub fn ssh_port(&self) -> &str { &self.ssh_port }
    pub fn ssh_username(&self) -> &str { &self.ssh_username }
    pub fn ssh_password(&self) -> &str { &self.ssh_password }
    pub fn ssh_host_key(&self) -> &str { &self.ssh_host_key }
    pub fn ssh_session_id(&self) -> &str { &self.ssh_session_id }
    pub fn ssh_obfuscated_port(&self) -> &str { &self.ssh_obfuscated_port }
    pub fn ssh_obfuscated_key(&self) -> &str { &self.ssh_obfuscated_key }
    pub fn homepages(&self) -> &[String] { &self.homepages }
    pub fn discovered_server_entries(&self) -> &[String] { &self.discovered_servers }
    pub fn page_view_regexes(&self) -> &[RegexReplace] { &self.page_view_regexes }
    pub fn https_request_regexes(&self) -> &[RegexReplace] { &self.https_request_regexes }
    pub fn speed_test(&self) -> Option<&SpeedTestTarget> { self.speed_test.as_ref() }

    /// Apply a `Key: value` handshake response. Unknown keys are ignored.
    pub fn parse_handshake_response(&mut self, response: &str) -> Result<()> {
        for line in response.lines() {
            let Some((key, value)) = line.split_once(':') else { continue };
            let value = value.trim();
            match key.trim() {
                "Upgrade" => self.upgrade_version = value.to_string(),
                "PSK" => self.psk = value.to_string(),
                "SSHPort" => self.ssh_port = value.to_string(),
                "SSHUsername" => self.ssh_username = value.to_string(),
                "SSHPassword" => self.ssh_password = value.to_string(),
                "SSHHostKey" => self.ssh_host_key = value.to_string(),
                "SSHSessionID" => self.ssh_session_id = value.to_string(),
                "SSHObfuscatedPort" => self.ssh_obfuscated_port = value.to_string(),
                "SSHObfuscatedKey" => self.ssh_obfuscated_key = value.to_string(),
                "Homepage" => self.homepages.push(value.to_string()),
                "Server" => self.discovered_servers.push(value.to_string()),
                "Config" => self.process_config(value)?,
                other => debug!(key = other, "ignoring handshake field"),
            }
        }
        Ok(())
    }

    fn process_config(&mut self, json: &str) -> Result<()> {
        let cfg: HandshakeConfig =
            serde_json::from_str(json).map_err(|e| Error::Handshake(format!("config: {e}")))?;
        self.page_view_regexes = compile(cfg.page_view_regexes)?;
        self.https_request_regexes = compile(cfg.https_request_regexes)?;
        self.speed_test = cfg.speed_test_url;
        Ok(())
    }
}

fn compile(specs: Vec<RegexSpec>) -> Result<Vec<RegexReplace>> {
    specs
        .into_iter()
        .map(|s| {
            let regex = Regex::new(&s.regex).map_err(|e| Error::Handshake(format!("regex {:?}: {e}", s.regex)))?;
            Ok(RegexReplace { regex, replace: s.replace })
        })
        .collect()
}
